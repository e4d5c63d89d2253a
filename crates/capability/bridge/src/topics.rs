//! 总线 topic 布局。

/// 指令类别（指令 topic 的最后一段）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Value,
    Setpoint,
    Schedule,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Value, CommandKind::Setpoint, CommandKind::Schedule];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Value => "value",
            CommandKind::Setpoint => "setpoint",
            CommandKind::Schedule => "schedule",
        }
    }

    fn from_suffix(value: &str) -> Option<Self> {
        match value {
            "value" => Some(CommandKind::Value),
            "setpoint" => Some(CommandKind::Setpoint),
            "schedule" => Some(CommandKind::Schedule),
            _ => None,
        }
    }
}

/// 入站 topic 分类结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    DatapointMap,
    Command { base: String, kind: CommandKind },
}

/// 以连接器 topic 根为前缀的 topic 集合。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    root: String,
}

impl Topics {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn logs(&self) -> String {
        format!("{}/logs", self.root)
    }

    pub fn heartbeat(&self) -> String {
        format!("{}/heartbeat", self.root)
    }

    pub fn available_datapoints(&self) -> String {
        format!("{}/available_datapoints", self.root)
    }

    pub fn datapoint_map(&self) -> String {
        format!("{}/datapoint_map", self.root)
    }

    /// 数据点默认的 topic 前缀 `{root}/{key}`。
    pub fn datapoint_base(&self, key: &str) -> String {
        format!("{}/{}", self.root, key)
    }

    pub fn value(&self, key: &str) -> String {
        format!("{}/value", self.datapoint_base(key))
    }

    /// 某个 topic 前缀下的三个指令 topic。
    pub fn command_topics(base: &str) -> Vec<String> {
        let base = base.trim_end_matches('/');
        CommandKind::ALL
            .iter()
            .map(|kind| format!("{}/{}", base, kind.as_str()))
            .collect()
    }

    /// 指令被拒绝时的报错 topic。
    pub fn error_of(command_topic: &str) -> String {
        format!("{}/error", command_topic)
    }

    pub fn ack_of(command_topic: &str) -> String {
        format!("{}/ack", command_topic)
    }

    pub fn classify(&self, topic: &str) -> Option<InboundTopic> {
        if topic == self.datapoint_map() {
            return Some(InboundTopic::DatapointMap);
        }
        let (base, suffix) = topic.rsplit_once('/')?;
        let kind = CommandKind::from_suffix(suffix)?;
        if base.is_empty() {
            return None;
        }
        Some(InboundTopic::Command {
            base: base.to_string(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_uses_root() {
        let topics = Topics::new("/plant-1/");
        assert_eq!(topics.logs(), "plant-1/logs");
        assert_eq!(topics.heartbeat(), "plant-1/heartbeat");
        assert_eq!(topics.value("temp_1"), "plant-1/temp_1/value");
        assert_eq!(
            Topics::command_topics("plant-1/setpoint_1"),
            vec![
                "plant-1/setpoint_1/value",
                "plant-1/setpoint_1/setpoint",
                "plant-1/setpoint_1/schedule"
            ]
        );
        assert_eq!(Topics::error_of("a/b/value"), "a/b/value/error");
    }

    #[test]
    fn classify_inbound_topics() {
        let topics = Topics::new("plant-1");
        assert_eq!(
            topics.classify("plant-1/datapoint_map"),
            Some(InboundTopic::DatapointMap)
        );
        assert_eq!(
            topics.classify("site/hvac/setpoint"),
            Some(InboundTopic::Command {
                base: "site/hvac".to_string(),
                kind: CommandKind::Setpoint
            })
        );
        assert_eq!(topics.classify("plant-1/heartbeat"), None);
        assert_eq!(topics.classify("value"), None);
    }
}
