use domain::{AvailableDatapoints, Direction};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 进程级可用数据点登记表：(方向, key) -> 示例值。
///
/// 只增不删；采集链路与运行时共享，修改经由异步互斥锁串行化。
#[derive(Clone, Default)]
pub struct AvailableDatapointsRegistry {
    inner: Arc<Mutex<AvailableDatapoints>>,
}

impl AvailableDatapointsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一批数据点，返回首次出现的 key 及其示例值。已登记的 key 不会被覆盖。
    pub async fn discover(
        &self,
        direction: Direction,
        examples: &BTreeMap<String, String>,
    ) -> Vec<(String, String)> {
        let mut state = self.inner.lock().await;
        let entries = match direction {
            Direction::Sensor => &mut state.sensor,
            Direction::Actuator => &mut state.actuator,
        };
        let mut discovered = Vec::new();
        for (key, example) in examples {
            if entries.contains_key(key) {
                continue;
            }
            entries.insert(key.clone(), example.clone());
            discovered.push((key.clone(), example.clone()));
        }
        discovered
    }

    pub async fn contains(&self, direction: Direction, key: &str) -> bool {
        let state = self.inner.lock().await;
        match direction {
            Direction::Sensor => state.sensor.contains_key(key),
            Direction::Actuator => state.actuator.contains_key(key),
        }
    }

    pub async fn snapshot(&self) -> AvailableDatapoints {
        self.inner.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn examples(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn discovery_is_append_only() {
        let registry = AvailableDatapointsRegistry::new();
        let first = registry
            .discover(Direction::Sensor, &examples(&[("temp_1", "22.3")]))
            .await;
        assert_eq!(first, vec![("temp_1".to_string(), "22.3".to_string())]);

        let second = registry
            .discover(
                Direction::Sensor,
                &examples(&[("temp_1", "23.0"), ("temp_2", "19.5")]),
            )
            .await;
        assert_eq!(second, vec![("temp_2".to_string(), "19.5".to_string())]);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.sensor.get("temp_1").map(String::as_str), Some("22.3"));
        assert!(snapshot.actuator.is_empty());
        assert!(registry.contains(Direction::Sensor, "temp_2").await);
        assert!(!registry.contains(Direction::Actuator, "temp_2").await);
    }
}
