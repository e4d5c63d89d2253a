use crate::error::BridgeError;
use crate::message::{
    BridgeEvent, BusSession, DeliveryClass, InboundCommand, OutboundMessage, Publisher,
};
use crate::state::{Backlog, ConnectionMachine, ConnectionState};
use crate::topics::{InboundTopic, Topics};
use domain::{Heartbeat, HeartbeatMessage};
use ems_telemetry::{record_backlog_dropped, record_heartbeat, record_reconnect};
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeFilter,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 所有总线报文统一使用 QoS 2。
const BUS_QOS: QoS = QoS::ExactlyOnce;

/// 总线桥接配置。
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_seconds: u64,
    /// rumqttc 请求通道容量。
    pub channel_capacity: usize,
    pub topic_root: String,
    pub reconnect_delay: Duration,
    pub backlog_capacity: usize,
    pub heartbeat_interval: Duration,
    /// 桥接事件通道容量。
    pub event_capacity: usize,
}

struct Shared {
    client: AsyncClient,
    topics: Topics,
    machine: Mutex<ConnectionMachine>,
    backlog: Mutex<Backlog>,
    subscriptions: Mutex<BTreeSet<String>>,
    heartbeat: Mutex<Option<Heartbeat>>,
    shutdown: watch::Sender<bool>,
}

/// 总线桥接：持有 MQTT 会话，由 `spawn` 启动网络与心跳任务。
pub struct BrokerBridge {
    handle: BridgeHandle,
    eventloop: EventLoop,
    events: mpsc::Sender<BridgeEvent>,
    reconnect_delay: Duration,
    heartbeat_interval: Duration,
}

/// 桥接句柄，可在任意任务中克隆使用。
#[derive(Clone)]
pub struct BridgeHandle {
    shared: Arc<Shared>,
}

/// 桥接后台任务。
pub struct BridgeTasks {
    pub network: JoinHandle<()>,
    pub heartbeat: JoinHandle<()>,
}

impl BridgeTasks {
    pub async fn join(self) {
        if let Err(err) = self.network.await {
            warn!(target: "ems.bridge", error = %err, "bridge_network_task_failed");
        }
        if let Err(err) = self.heartbeat.await {
            warn!(target: "ems.bridge", error = %err, "bridge_heartbeat_task_failed");
        }
    }
}

impl BrokerBridge {
    pub fn new(config: BridgeConfig) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let mut options = MqttOptions::new(config.client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity.max(1));
        let (events, receiver) = mpsc::channel(config.event_capacity.max(1));
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            client,
            topics: Topics::new(config.topic_root),
            machine: Mutex::new(ConnectionMachine::new()),
            backlog: Mutex::new(Backlog::new(config.backlog_capacity)),
            subscriptions: Mutex::new(BTreeSet::new()),
            heartbeat: Mutex::new(None),
            shutdown,
        });

        let bridge = Self {
            handle: BridgeHandle { shared },
            eventloop,
            events,
            reconnect_delay: config.reconnect_delay,
            heartbeat_interval: config.heartbeat_interval,
        };
        (bridge, receiver)
    }

    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    pub fn spawn(self) -> BridgeTasks {
        let network = tokio::spawn(run_network(
            self.handle.shared.clone(),
            self.eventloop,
            self.events.clone(),
            self.reconnect_delay,
        ));
        let heartbeat = tokio::spawn(run_heartbeat(
            self.handle.clone(),
            self.events,
            self.heartbeat_interval,
        ));
        BridgeTasks { network, heartbeat }
    }
}

impl BridgeHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.machine.lock().state()
    }

    pub fn topics(&self) -> &Topics {
        &self.shared.topics
    }

    pub fn last_heartbeat(&self) -> Option<Heartbeat> {
        *self.shared.heartbeat.lock()
    }

    pub fn backlog_len(&self) -> usize {
        self.shared.backlog.lock().len()
    }

    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.shared.subscriptions.lock().clone()
    }

    /// 替换订阅集合。已连接时立即订阅新增、退订移除的 topic；
    /// 未连接时只更新集合，下次 ConnAck 时整体订阅。
    pub fn set_subscriptions(&self, topics: BTreeSet<String>) -> Result<(), BridgeError> {
        let (added, removed) = {
            let mut current = self.shared.subscriptions.lock();
            let added: Vec<String> = topics.difference(&current).cloned().collect();
            let removed: Vec<String> = current.difference(&topics).cloned().collect();
            *current = topics;
            (added, removed)
        };
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        if !added.is_empty() {
            let filters = added
                .iter()
                .map(|topic| SubscribeFilter::new(topic.clone(), BUS_QOS))
                .collect::<Vec<_>>();
            self.shared
                .client
                .try_subscribe_many(filters)
                .map_err(|err| BridgeError::Client(err.to_string()))?;
        }
        for topic in &removed {
            self.shared
                .client
                .try_unsubscribe(topic.clone())
                .map_err(|err| BridgeError::Client(err.to_string()))?;
        }
        info!(
            target: "ems.bridge",
            added = added.len(),
            removed = removed.len(),
            "bridge_subscriptions_updated"
        );
        Ok(())
    }

    /// 主动断开，之后不再重连。
    pub fn disconnect(&self) {
        self.shared.machine.lock().shutdown();
        if let Err(err) = self.shared.client.try_disconnect() {
            debug!(target: "ems.bridge", error = %err, "bridge_disconnect_request_failed");
        }
        self.shared.shutdown.send_replace(true);
        info!(target: "ems.bridge", "bridge_disconnect_requested");
    }

    fn send_now(&self, message: &OutboundMessage) -> Result<(), BridgeError> {
        self.shared
            .client
            .try_publish(
                message.topic.clone(),
                BUS_QOS,
                message.retain,
                message.payload.clone(),
            )
            .map_err(|err| BridgeError::Client(err.to_string()))
    }

    fn hold(&self, message: OutboundMessage) {
        if let Some(dropped) = self.shared.backlog.lock().push(message) {
            record_backlog_dropped();
            warn!(target: "ems.bridge", topic = %dropped.topic, "bridge_backlog_dropped");
        }
    }

    /// 连接恢复后按原顺序补发积压报文。
    fn flush_backlog(&self) {
        let pending = self.shared.backlog.lock().drain();
        if pending.is_empty() {
            return;
        }
        let total = pending.len();
        let mut iter = pending.into_iter();
        while let Some(message) = iter.next() {
            if let Err(err) = self.send_now(&message) {
                warn!(target: "ems.bridge", error = %err, "bridge_backlog_flush_interrupted");
                self.hold(message);
                for rest in iter {
                    self.hold(rest);
                }
                return;
            }
        }
        info!(target: "ems.bridge", count = total, "bridge_backlog_flushed");
    }

    fn resubscribe(&self) {
        let filters = self
            .shared
            .subscriptions
            .lock()
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), BUS_QOS))
            .collect::<Vec<_>>();
        if filters.is_empty() {
            return;
        }
        let count = filters.len();
        match self.shared.client.try_subscribe_many(filters) {
            Ok(()) => info!(target: "ems.bridge", count = count, "bridge_subscribed"),
            Err(err) => warn!(target: "ems.bridge", error = %err, "bridge_subscribe_failed"),
        }
    }
}

impl Publisher for BridgeHandle {
    fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        if self.state() != ConnectionState::Connected {
            return match message.class {
                DeliveryClass::Telemetry => Err(BridgeError::NotConnected),
                DeliveryClass::Control => {
                    self.hold(message);
                    Ok(())
                }
            };
        }
        match self.send_now(&message) {
            Ok(()) => Ok(()),
            Err(err) if message.class == DeliveryClass::Control => {
                debug!(target: "ems.bridge", error = %err, topic = %message.topic, "bridge_publish_deferred");
                self.hold(message);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl BusSession for BridgeHandle {
    fn set_subscriptions(&self, topics: BTreeSet<String>) -> Result<(), BridgeError> {
        BridgeHandle::set_subscriptions(self, topics)
    }

    fn disconnect(&self) {
        BridgeHandle::disconnect(self)
    }
}

fn forward(events: &mpsc::Sender<BridgeEvent>, event: BridgeEvent) {
    if let Err(err) = events.try_send(event) {
        warn!(target: "ems.bridge", error = %err, "bridge_event_dropped");
    }
}

async fn run_network(
    shared: Arc<Shared>,
    mut eventloop: EventLoop,
    events: mpsc::Sender<BridgeEvent>,
    reconnect_delay: Duration,
) {
    let handle = BridgeHandle { shared };
    let mut shutdown = handle.shared.shutdown.subscribe();
    info!(target: "ems.bridge", root = %handle.topics().root(), "bridge_started");

    loop {
        let polled = tokio::select! {
            _ = shutdown.changed() => {
                drain_disconnect(&mut eventloop).await;
                break;
            }
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!(target: "ems.bridge", code = ?ack.code, "bridge_connack_refused");
                    continue;
                }
                if !handle.shared.machine.lock().connected() {
                    continue;
                }
                // clean session：每次连上都按当前集合重新订阅
                handle.resubscribe();
                handle.flush_backlog();
                info!(target: "ems.bridge", "bridge_connected");
                forward(&events, BridgeEvent::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = publish.topic.clone();
                match handle.topics().classify(&topic) {
                    Some(InboundTopic::DatapointMap) => {
                        forward(&events, BridgeEvent::DatapointMap(publish.payload.to_vec()));
                    }
                    Some(InboundTopic::Command { base, kind }) => {
                        debug!(target: "ems.bridge", topic = %topic, "bridge_command_received");
                        forward(
                            &events,
                            BridgeEvent::Command(InboundCommand {
                                topic,
                                base,
                                kind,
                                payload: publish.payload.to_vec(),
                            }),
                        );
                    }
                    None => {
                        debug!(target: "ems.bridge", topic = %topic, "bridge_topic_ignored");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                if handle.state() == ConnectionState::Disconnected {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => {
                if !handle.shared.machine.lock().should_reconnect() {
                    break;
                }
                let dropped = handle.shared.machine.lock().lost();
                record_reconnect();
                warn!(
                    target: "ems.bridge",
                    error = %err,
                    delay_ms = reconnect_delay.as_millis() as u64,
                    "bridge_connection_lost"
                );
                if dropped {
                    forward(&events, BridgeEvent::ConnectionLost(err.to_string()));
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
    info!(target: "ems.bridge", "bridge_stopped");
}

/// 让事件循环把 DISCONNECT 报文发出去。
async fn drain_disconnect(eventloop: &mut EventLoop) {
    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!(target: "ems.bridge", "bridge_disconnect_drain_timeout");
    }
}

async fn run_heartbeat(
    handle: BridgeHandle,
    events: mpsc::Sender<BridgeEvent>,
    period: Duration,
) {
    let mut shutdown = handle.shared.shutdown.subscribe();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let heartbeat = handle.beat(chrono::Utc::now(), period);
        forward(&events, BridgeEvent::Heartbeat(heartbeat));
    }
}

impl BridgeHandle {
    /// 推进心跳记录并发布（保留）。断线时只更新记录。
    pub fn beat(&self, now: chrono::DateTime<chrono::Utc>, period: Duration) -> Heartbeat {
        let heartbeat = {
            let mut guard = self.shared.heartbeat.lock();
            let next = Heartbeat::tick(guard.as_ref(), now, period);
            *guard = Some(next);
            next
        };
        record_heartbeat();
        let message = OutboundMessage::json(
            self.topics().heartbeat(),
            &HeartbeatMessage::from(&heartbeat),
            true,
            DeliveryClass::Telemetry,
        );
        match message.and_then(|message| self.publish(message)) {
            Ok(()) => debug!(target: "ems.bridge", "heartbeat_published"),
            Err(err) => debug!(target: "ems.bridge", error = %err, "heartbeat_not_published"),
        }
        heartbeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bridge(backlog: usize) -> (BrokerBridge, mpsc::Receiver<BridgeEvent>) {
        BrokerBridge::new(BridgeConfig {
            client_id: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: None,
            password: None,
            keep_alive_seconds: 30,
            channel_capacity: 16,
            topic_root: "plant".to_string(),
            reconnect_delay: Duration::from_millis(10),
            backlog_capacity: backlog,
            heartbeat_interval: Duration::from_secs(30),
            event_capacity: 8,
        })
    }

    #[test]
    fn telemetry_is_dropped_while_offline() {
        let (bridge, _events) = bridge(4);
        let handle = bridge.handle();
        assert_eq!(handle.state(), ConnectionState::Connecting);
        let err = handle
            .publish(OutboundMessage::telemetry("plant/temp_1/value", b"{}".to_vec()))
            .unwrap_err();
        assert_eq!(err, BridgeError::NotConnected);
        assert_eq!(handle.backlog_len(), 0);
    }

    #[test]
    fn control_is_held_while_offline() {
        let (bridge, _events) = bridge(2);
        let handle = bridge.handle();
        for index in 0..3 {
            handle
                .publish(OutboundMessage::control(format!("plant/logs/{index}"), Vec::new(), false))
                .unwrap();
        }
        assert_eq!(handle.backlog_len(), 2);
    }

    #[test]
    fn connected_publish_goes_to_client() {
        let (bridge, _events) = bridge(2);
        let handle = bridge.handle();
        handle.shared.machine.lock().connected();
        handle
            .publish(OutboundMessage::telemetry("plant/temp_1/value", b"{}".to_vec()))
            .unwrap();
        handle.flush_backlog();
        assert_eq!(handle.backlog_len(), 0);
    }

    #[test]
    fn subscriptions_are_kept_while_offline() {
        let (bridge, _events) = bridge(2);
        let handle = bridge.handle();
        let topics: BTreeSet<String> = ["plant/datapoint_map", "plant/relay/value"]
            .into_iter()
            .map(String::from)
            .collect();
        handle.set_subscriptions(topics.clone()).unwrap();
        assert_eq!(handle.subscriptions(), topics);
    }

    #[test]
    fn heartbeat_is_recorded_even_offline() {
        let (bridge, _events) = bridge(2);
        let handle = bridge.handle();
        let now = chrono::Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let first = handle.beat(now, Duration::from_secs(30));
        let second = handle.beat(now, Duration::from_secs(30));
        assert!(second.last_heartbeat > first.last_heartbeat);
        assert_eq!(handle.last_heartbeat(), Some(second));
    }

    #[test]
    fn disconnect_is_final() {
        let (bridge, _events) = bridge(2);
        let handle = bridge.handle();
        handle.disconnect();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(!handle.shared.machine.lock().connected());
    }
}
