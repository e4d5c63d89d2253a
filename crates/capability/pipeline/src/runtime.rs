//! 连接器运行时：把调度器、采集链路、执行器链路和总线事件串起来。
//!
//! ```text
//! Dispatcher ──Trigger──▶ sensor worker ──▶ SensorFlow
//! BridgeEvent ──▶ router ──(key, InboundCommand)──▶ actuator worker ──▶ ActuatorFlow
//! ```
//!
//! 停机顺序：调度器 -> 采集任务 -> 执行器任务 -> 总线会话 -> 设备传输。

use crate::dispatcher::{self, DispatchMode, Trigger};
use crate::error::ConnectorError;
use crate::event_log::EventLog;
use crate::registry::AvailableDatapointsRegistry;
use crate::routing::Routing;
use crate::sensor::SensorFlow;
use chrono::Utc;
use domain::{DatapointMap, Direction};
use ems_bridge::{BridgeEvent, BusSession, DeliveryClass, InboundCommand, OutboundMessage, Publisher, Topics};
use ems_codec::Codec;
use ems_control::{ActuatorFlow, ActuatorSettings};
use ems_protocol::Transport;
use ems_storage::RecordStore;
use ems_telemetry::new_cycle_id;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, warn};

/// 运行时参数。
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// 日志报文中的 emitter。
    pub emitter: String,
    pub dispatch: DispatchMode,
    pub actuator: ActuatorSettings,
    /// 检查设定值/时间表到期项的周期。
    pub schedule_tick: Duration,
    /// event 调度下接收失败后的等待时间。
    pub failure_backoff: Duration,
    pub command_queue: usize,
}

/// 连接器实例。
pub struct Connector {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    session: Arc<dyn BusSession>,
    store: Arc<dyn RecordStore>,
    topics: Topics,
    settings: ConnectorSettings,
    registry: AvailableDatapointsRegistry,
}

impl Connector {
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        session: Arc<dyn BusSession>,
        store: Arc<dyn RecordStore>,
        topics: Topics,
        settings: ConnectorSettings,
    ) -> Self {
        Self {
            transport,
            codec,
            session,
            store,
            topics,
            settings,
            registry: AvailableDatapointsRegistry::new(),
        }
    }

    pub fn registry(&self) -> AvailableDatapointsRegistry {
        self.registry.clone()
    }

    /// 运行到 `shutdown` 置位或总线事件流结束，然后按顺序停机。
    pub async fn run(
        self,
        mut events: mpsc::Receiver<BridgeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConnectorError> {
        let publisher: Arc<dyn Publisher> = self.session.clone();
        let event_log = EventLog::new(
            self.settings.emitter.clone(),
            &self.topics,
            publisher.clone(),
            self.store.clone(),
        );

        let actuators = {
            let datapoints = self.codec.datapoints();
            event_log.datapoints_loaded(&datapoints).await;
            datapoints
                .iter()
                .filter(|meta| meta.direction == Direction::Actuator)
                .map(|meta| (meta.key.clone(), meta.example_value.clone().unwrap_or_default()))
                .collect::<BTreeMap<_, _>>()
        };
        self.registry.discover(Direction::Actuator, &actuators).await;

        let routing = Routing::initial(self.codec.as_ref(), &self.topics);
        self.session
            .set_subscriptions(routing.subscriptions(&self.topics))?;
        let (routing_tx, routing_rx) = watch::channel(routing);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (dispatch_task, triggers) = dispatcher::spawn(self.settings.dispatch, stop_rx.clone());

        let sensor = SensorFlow::new(
            self.transport.clone(),
            self.codec.clone(),
            publisher.clone(),
            self.registry.clone(),
            event_log.clone(),
            self.topics.clone(),
            routing_rx,
        );
        let backoff = match self.settings.dispatch {
            DispatchMode::Event => Some(self.settings.failure_backoff),
            DispatchMode::Interval(_) => None,
        };
        let sensor_task = tokio::spawn(run_sensor_worker(sensor, triggers, stop_rx, backoff));

        let actuator = ActuatorFlow::new(
            self.transport.clone(),
            self.codec.clone(),
            publisher.clone(),
            self.settings.actuator,
        );
        let (command_tx, command_rx) = mpsc::channel(self.settings.command_queue.max(1));
        let actuator_task = tokio::spawn(run_actuator_worker(
            actuator,
            command_rx,
            event_log.clone(),
            self.settings.schedule_tick,
        ));

        event_log
            .info(format!("connector started on {}", self.transport.name()))
            .await;

        let router = Router {
            session: self.session.clone(),
            publisher,
            event_log: event_log.clone(),
            registry: self.registry.clone(),
            topics: self.topics.clone(),
            routing: routing_tx,
            commands: command_tx,
        };
        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => event,
            };
            match event {
                Some(event) => router.handle(event).await,
                None => {
                    warn!(target: "ems.connector", "bridge_events_closed");
                    break;
                }
            }
        }

        event_log.info("connector stopping").await;
        stop_tx.send_replace(true);
        let mut failure = None;
        for (name, task) in [("dispatcher", dispatch_task), ("sensor", sensor_task)] {
            if let Err(err) = task.await {
                failure.get_or_insert(ConnectorError::Task(format!("{} task: {}", name, err)));
            }
        }
        drop(router);
        if let Err(err) = actuator_task.await {
            failure.get_or_insert(ConnectorError::Task(format!("actuator task: {}", err)));
        }

        self.session.disconnect();
        if let Err(err) = self.transport.disconnect().await {
            warn!(target: "ems.connector", error = %err, "transport_disconnect_failed");
        }
        info!(target: "ems.connector", "connector_stopped");

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// 总线入站事件分发。
struct Router {
    session: Arc<dyn BusSession>,
    publisher: Arc<dyn Publisher>,
    event_log: EventLog,
    registry: AvailableDatapointsRegistry,
    topics: Topics,
    routing: watch::Sender<Routing>,
    commands: mpsc::Sender<(String, InboundCommand)>,
}

impl Router {
    async fn handle(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Connected => {
                self.event_log.info("connected to broker").await;
                self.announce().await;
            }
            BridgeEvent::ConnectionLost(reason) => {
                self.event_log
                    .warning(format!("broker connection lost: {}", reason))
                    .await;
            }
            BridgeEvent::DatapointMap(payload) => self.apply_map(&payload).await,
            BridgeEvent::Command(command) => self.route_command(command).await,
            BridgeEvent::Heartbeat(heartbeat) => self.event_log.heartbeat(&heartbeat).await,
        }
    }

    /// 每次连上 Broker 都重新发布可用数据点与当前映射（保留）。
    async fn announce(&self) {
        let snapshot = self.registry.snapshot().await;
        self.publish_retained(self.topics.available_datapoints(), &snapshot);
        let map = self.routing.borrow().to_map();
        self.publish_retained(self.topics.datapoint_map(), &map);
    }

    async fn apply_map(&self, payload: &[u8]) {
        let map: DatapointMap = match serde_json::from_slice(payload) {
            Ok(map) => map,
            Err(err) => {
                self.event_log
                    .warning(format!("invalid datapoint_map ignored: {}", err))
                    .await;
                return;
            }
        };

        let update = self.routing.borrow().apply(&map);
        for reason in &update.ignored {
            self.event_log
                .warning(format!("datapoint_map entry ignored: {}", reason))
                .await;
        }
        if update.routing == *self.routing.borrow() {
            debug!(target: "ems.connector", "datapoint_map_unchanged");
            return;
        }

        if let Err(err) = self
            .session
            .set_subscriptions(update.routing.subscriptions(&self.topics))
        {
            self.event_log
                .error(format!("resubscribe after datapoint_map failed: {}", err))
                .await;
        }
        let map = update.routing.to_map();
        self.routing.send_replace(update.routing);
        self.publish_retained(self.topics.datapoint_map(), &map);
        self.event_log.info("datapoint_map applied").await;
    }

    async fn route_command(&self, command: InboundCommand) {
        let key = self
            .routing
            .borrow()
            .actuator_key(&command.base)
            .map(str::to_string);
        let Some(key) = key else {
            self.event_log
                .warning(format!("no actuator routed for {}", command.topic))
                .await;
            return;
        };
        if self.commands.send((key, command)).await.is_err() {
            warn!(target: "ems.connector", "actuator_worker_gone");
        }
    }

    fn publish_retained<T: serde::Serialize>(&self, topic: String, body: &T) {
        let published = OutboundMessage::json(topic, body, true, DeliveryClass::Control)
            .and_then(|message| self.publisher.publish(message));
        if let Err(err) = published {
            warn!(target: "ems.connector", error = %err, "announce_failed");
        }
    }
}

/// 采集任务：每个触发执行一次周期。
///
/// 停机时可以打断等待中的接收；已收到的报文会处理完再退出。
async fn run_sensor_worker(
    flow: SensorFlow,
    mut triggers: mpsc::Receiver<Trigger>,
    mut shutdown: watch::Receiver<bool>,
    backoff: Option<Duration>,
) {
    loop {
        let trigger = tokio::select! {
            _ = shutdown.changed() => break,
            trigger = triggers.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
        };
        let span = info_span!("sensor_cycle", cycle_id = %new_cycle_id(), sequence = trigger.sequence);
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = flow.receive().instrument(span.clone()) => received,
        };
        match received {
            Ok(raw) => {
                if let Err(err) = flow.process(raw).instrument(span).await {
                    debug!(target: "ems.pipeline", error = %err, "sensor_cycle_incomplete");
                }
            }
            Err(_) => {
                if let Some(backoff) = backoff {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
    debug!(target: "ems.pipeline", "sensor_worker_stopped");
}

/// 执行器任务：串行处理指令，并按周期写入到期的计划项。
async fn run_actuator_worker(
    mut flow: ActuatorFlow,
    mut commands: mpsc::Receiver<(String, InboundCommand)>,
    event_log: EventLog,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some((key, command)) = command else { break };
                if let Err(err) = flow.execute(&key, &command).await {
                    let msg = format!("command on {} failed: {}", command.topic, err);
                    if err.is_rejection() {
                        event_log.warning(msg).await;
                    } else {
                        event_log.error(msg).await;
                    }
                }
            }
            _ = ticker.tick() => {
                let written = flow.apply_due(Utc::now()).await;
                if written > 0 {
                    debug!(target: "ems.pipeline", written = written, "actuator_plan_tick");
                }
            }
        }
    }
    debug!(target: "ems.pipeline", "actuator_worker_stopped");
}

/// 把一个运行中的连接器放到后台任务里。
pub fn spawn_connector(
    connector: Connector,
    events: mpsc::Receiver<BridgeEvent>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<(), ConnectorError>> {
    tokio::spawn(connector.run(events, shutdown))
}
