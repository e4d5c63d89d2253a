//! 连接状态机与断线积压队列。

use crate::message::OutboundMessage;
use std::collections::VecDeque;
use std::fmt;

/// Broker 连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    /// 主动断开，不再重连。
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(text)
    }
}

/// `Connecting -> Connected -> Reconnecting -> Connected`，主动断开后进入 `Disconnected`。
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 收到 ConnAck。返回 false 表示已主动断开，应忽略。
    pub fn connected(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connected;
        true
    }

    /// 非主动断线。返回 true 表示本次从已连接状态掉线。
    pub fn lost(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected => {
                self.state = ConnectionState::Reconnecting;
                true
            }
            ConnectionState::Connecting => {
                self.state = ConnectionState::Reconnecting;
                false
            }
            ConnectionState::Reconnecting | ConnectionState::Disconnected => false,
        }
    }

    pub fn shutdown(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    pub fn should_reconnect(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }
}

/// 断线期间暂存控制类报文的有界队列，满时丢弃最旧的一条。
#[derive(Debug)]
pub struct Backlog {
    capacity: usize,
    queue: VecDeque<OutboundMessage>,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
        }
    }

    /// 入队，返回因容量限制被丢弃的报文。
    pub fn push(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        if self.capacity == 0 {
            return Some(message);
        }
        let dropped = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(message);
        dropped
    }

    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn involuntary_loss_reconnects() {
        let mut machine = ConnectionMachine::new();
        assert!(!machine.lost());
        assert_eq!(machine.state(), ConnectionState::Reconnecting);
        assert!(machine.connected());
        assert!(machine.lost());
        assert!(!machine.lost());
        assert!(machine.should_reconnect());
        assert!(machine.connected());
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn voluntary_disconnect_is_final() {
        let mut machine = ConnectionMachine::new();
        machine.connected();
        machine.shutdown();
        assert!(!machine.lost());
        assert!(!machine.connected());
        assert!(!machine.should_reconnect());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn backlog_drops_oldest() {
        let mut backlog = Backlog::new(2);
        for topic in ["a", "b"] {
            assert!(backlog.push(OutboundMessage::control(topic, Vec::new(), false)).is_none());
        }
        let dropped = backlog
            .push(OutboundMessage::control("c", Vec::new(), false))
            .expect("dropped");
        assert_eq!(dropped.topic, "a");
        let topics: Vec<_> = backlog.drain().into_iter().map(|m| m.topic).collect();
        assert_eq!(topics, vec!["b", "c"]);
        assert!(backlog.is_empty());
    }
}
