use domain::{DatapointMap, Direction};
use ems_bridge::Topics;
use ems_codec::Codec;
use std::collections::{BTreeMap, BTreeSet};

/// 数据点路由：传感器 key -> 发布 topic，指令 topic 前缀 -> 执行器 key。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routing {
    sensor: BTreeMap<String, String>,
    actuator: BTreeMap<String, String>,
}

/// 应用 datapoint_map 的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingUpdate {
    pub routing: Routing,
    /// 未登记或 topic 非法而被忽略的条目。
    pub ignored: Vec<String>,
}

impl Routing {
    /// 按配置生成默认路由：`{root}/{key}/value` 与 `{root}/{key}`。
    pub fn initial(codec: &dyn Codec, topics: &Topics) -> Self {
        let mut routing = Self::default();
        for meta in codec.datapoints() {
            match meta.direction {
                Direction::Sensor => {
                    routing.sensor.insert(meta.key.clone(), topics.value(&meta.key));
                }
                Direction::Actuator => {
                    routing
                        .actuator
                        .insert(topics.datapoint_base(&meta.key), meta.key.clone());
                }
            }
        }
        routing
    }

    pub fn sensor_topic(&self, key: &str) -> Option<&str> {
        self.sensor.get(key).map(String::as_str)
    }

    pub fn actuator_key(&self, base: &str) -> Option<&str> {
        self.actuator.get(base).map(String::as_str)
    }

    /// 入站 datapoint_map 只改写已知 key 的路由，未提及的 key 保持不变。
    pub fn apply(&self, map: &DatapointMap) -> RoutingUpdate {
        let mut routing = self.clone();
        let mut ignored = Vec::new();

        for (key, topic) in &map.sensor {
            if !routing.sensor.contains_key(key) {
                ignored.push(format!("unknown sensor {}", key));
            } else if !is_concrete_topic(topic) {
                ignored.push(format!("invalid topic {} for {}", topic, key));
            } else {
                routing.sensor.insert(key.clone(), topic.clone());
            }
        }

        let known_actuators: BTreeSet<String> = routing.actuator.values().cloned().collect();
        for (base, key) in &map.actuator {
            let base = base.trim_end_matches('/');
            if !known_actuators.contains(key) {
                ignored.push(format!("unknown actuator {}", key));
            } else if !is_concrete_topic(base) {
                ignored.push(format!("invalid topic {} for {}", base, key));
            } else if routing
                .actuator
                .get(base)
                .is_some_and(|existing| existing != key)
            {
                ignored.push(format!("topic {} already routed", base));
            } else {
                routing.actuator.retain(|_, existing| existing != key);
                routing.actuator.insert(base.to_string(), key.clone());
            }
        }

        RoutingUpdate { routing, ignored }
    }

    pub fn to_map(&self) -> DatapointMap {
        DatapointMap {
            sensor: self.sensor.clone(),
            actuator: self.actuator.clone(),
        }
    }

    /// 总线订阅集合：每个执行器的指令 topic 加上 datapoint_map。
    pub fn subscriptions(&self, topics: &Topics) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = self
            .actuator
            .keys()
            .flat_map(|base| Topics::command_topics(base))
            .collect();
        set.insert(topics.datapoint_map());
        set
    }
}

fn is_concrete_topic(topic: &str) -> bool {
    !topic.trim_matches('/').is_empty() && !topic.contains(['+', '#'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ems_codec::TypedCodec;

    fn routing() -> (Routing, Topics) {
        let codec = TypedCodec::from_json(
            r#"[
              { "key": "temp_1", "direction": "sensor", "data_format": "continuous_numeric" },
              { "key": "setpoint_1", "direction": "actuator", "data_format": "continuous_numeric" }
            ]"#,
        )
        .unwrap();
        let topics = Topics::new("plant");
        (Routing::initial(&codec, &topics), topics)
    }

    #[test]
    fn initial_layout() {
        let (routing, topics) = routing();
        assert_eq!(routing.sensor_topic("temp_1"), Some("plant/temp_1/value"));
        assert_eq!(routing.actuator_key("plant/setpoint_1"), Some("setpoint_1"));
        let subscriptions: Vec<String> = routing.subscriptions(&topics).into_iter().collect();
        assert_eq!(
            subscriptions,
            vec![
                "plant/datapoint_map",
                "plant/setpoint_1/schedule",
                "plant/setpoint_1/setpoint",
                "plant/setpoint_1/value",
            ]
        );
    }

    #[test]
    fn map_reroutes_known_keys_only() {
        let (routing, topics) = routing();
        let mut map = DatapointMap::default();
        map.sensor
            .insert("temp_1".to_string(), "site/hall/temp".to_string());
        map.sensor
            .insert("ghost".to_string(), "site/ghost".to_string());
        map.actuator
            .insert("site/hall/setpoint".to_string(), "setpoint_1".to_string());
        map.actuator
            .insert("site/#".to_string(), "setpoint_1".to_string());

        let update = routing.apply(&map);
        assert_eq!(update.ignored.len(), 2);
        let routing = update.routing;
        assert_eq!(routing.sensor_topic("temp_1"), Some("site/hall/temp"));
        assert_eq!(routing.actuator_key("site/hall/setpoint"), Some("setpoint_1"));
        assert_eq!(routing.actuator_key("plant/setpoint_1"), None);
        assert!(
            routing
                .subscriptions(&topics)
                .contains("site/hall/setpoint/value")
        );
    }

    #[test]
    fn echoed_map_is_a_no_op() {
        let (routing, _) = routing();
        let update = routing.apply(&routing.to_map());
        assert!(update.ignored.is_empty());
        assert_eq!(update.routing, routing);
    }
}
