//! 采集调度器：决定何时触发一次传感器周期。
//!
//! - `Interval`：固定周期触发；上一周期未结束时合并触发，不排队
//! - `Event`：上一周期结束即触发下一次，`read_raw` 自身阻塞到设备上报

use ems_protocol::ReadMode;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// 调度方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Interval(Duration),
    Event,
}

impl DispatchMode {
    /// 按传输层的自然读取方式选择调度器。
    pub fn natural(read_mode: ReadMode, period: Duration) -> Self {
        match read_mode {
            ReadMode::Polled => Self::Interval(period),
            ReadMode::Pushed => Self::Event,
        }
    }
}

/// 一次采集触发。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub sequence: u64,
}

/// 启动调度任务，返回任务句柄与触发队列。
///
/// 触发队列容量为 1：同一时刻最多一个待处理周期，采集周期之间不会并发。
pub fn spawn(mode: DispatchMode, shutdown: watch::Receiver<bool>) -> (JoinHandle<()>, mpsc::Receiver<Trigger>) {
    let (tx, rx) = mpsc::channel(1);
    let task = match mode {
        DispatchMode::Interval(period) => tokio::spawn(run_interval(period, tx, shutdown)),
        DispatchMode::Event => tokio::spawn(run_event(tx, shutdown)),
    };
    (task, rx)
}

async fn run_interval(period: Duration, triggers: mpsc::Sender<Trigger>, mut shutdown: watch::Receiver<bool>) {
    info!(target: "ems.dispatcher", mode = "interval", period_ms = period.as_millis() as u64, "dispatcher_started");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sequence = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        sequence += 1;
        match triggers.try_send(Trigger { sequence }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(target: "ems.dispatcher", sequence = sequence, "sensor_cycle_coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
    info!(target: "ems.dispatcher", "dispatcher_stopped");
}

async fn run_event(triggers: mpsc::Sender<Trigger>, mut shutdown: watch::Receiver<bool>) {
    info!(target: "ems.dispatcher", mode = "event", "dispatcher_started");
    let mut sequence = 0u64;
    loop {
        sequence += 1;
        let sent = tokio::select! {
            _ = shutdown.changed() => break,
            sent = triggers.send(Trigger { sequence }) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
    info!(target: "ems.dispatcher", "dispatcher_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_mode_follows_transport() {
        let period = Duration::from_secs(5);
        assert_eq!(DispatchMode::natural(ReadMode::Polled, period), DispatchMode::Interval(period));
        assert_eq!(DispatchMode::natural(ReadMode::Pushed, period), DispatchMode::Event);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_consumer_coalesces_ticks() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (task, mut triggers) = spawn(DispatchMode::Interval(Duration::from_secs(1)), stop_rx);

        let first = triggers.recv().await.unwrap();
        assert_eq!(first.sequence, 1);

        // 消费方占用 3.5 个周期，期间的触发只保留一个
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let second = triggers.recv().await.unwrap();
        assert_eq!(second.sequence, 2);
        assert!(triggers.try_recv().is_err());

        stop_tx.send_replace(true);
        task.await.unwrap();
        assert!(triggers.recv().await.is_none());
    }

    #[tokio::test]
    async fn event_mode_stops_on_shutdown() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (task, mut triggers) = spawn(DispatchMode::Event, stop_rx);
        assert_eq!(triggers.recv().await.unwrap().sequence, 1);
        assert_eq!(triggers.recv().await.unwrap().sequence, 2);
        stop_tx.send_replace(true);
        task.await.unwrap();
    }
}
