//! 每个执行器 key 的设定值/时间表计划。

use crate::command::PlanItem;
use chrono::{DateTime, Utc};
use domain::TypedValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct SchedulePlan {
    command_topic: String,
    items: Vec<PlanItem>,
    /// 最近一次写出的值；胜出值变化时才再次写入。
    last_written: Option<TypedValue>,
}

/// 到期需要写入的值。
#[derive(Debug, Clone, PartialEq)]
pub struct DueWrite {
    pub key: String,
    /// 下发该计划的指令 topic，用于回执与报错。
    pub command_topic: String,
    pub value: TypedValue,
}

/// 计划簿：key -> 计划。
#[derive(Debug, Default)]
pub struct ScheduleBook {
    plans: BTreeMap<String, SchedulePlan>,
}

impl ScheduleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换 key 的计划，返回当前应立即生效的值。空列表等同于清除。
    pub fn install(
        &mut self,
        key: &str,
        command_topic: &str,
        items: Vec<PlanItem>,
        now: DateTime<Utc>,
    ) -> Option<TypedValue> {
        let items: Vec<PlanItem> = items
            .into_iter()
            .filter(|item| !item.is_expired(now))
            .collect();
        if items.is_empty() {
            self.plans.remove(key);
            return None;
        }
        let active = winning(&items, now);
        self.plans.insert(
            key.to_string(),
            SchedulePlan {
                command_topic: command_topic.to_string(),
                items,
                last_written: active.clone(),
            },
        );
        active
    }

    /// 清除 key 的计划，返回是否存在过计划。
    pub fn clear(&mut self, key: &str) -> bool {
        self.plans.remove(key).is_some()
    }

    /// 尚未过期的计划项数量。
    pub fn pending(&self, key: &str) -> usize {
        self.plans.get(key).map_or(0, |plan| plan.items.len())
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// 收集胜出值发生变化的计划，并清理过期项。
    ///
    /// 覆盖项过期后，仍在生效的基础项重新胜出并再次写入。
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<DueWrite> {
        let mut writes = Vec::new();
        for (key, plan) in self.plans.iter_mut() {
            plan.items.retain(|item| !item.is_expired(now));
            let Some(value) = winning(&plan.items, now) else {
                continue;
            };
            if plan.last_written.as_ref() == Some(&value) {
                continue;
            }
            plan.last_written = Some(value.clone());
            writes.push(DueWrite {
                key: key.clone(),
                command_topic: plan.command_topic.clone(),
                value,
            });
        }
        self.plans.retain(|_, plan| !plan.items.is_empty());
        writes
    }
}

/// 生效项中起始时间最晚者胜出；无起始时间视为最早，同起始时间取列表中靠后的一项。
fn winning(items: &[PlanItem], now: DateTime<Utc>) -> Option<TypedValue> {
    let mut chosen: Option<&PlanItem> = None;
    for item in items.iter().filter(|item| item.is_active(now)) {
        if chosen.is_none_or(|current| item.from >= current.from) {
            chosen = Some(item);
        }
    }
    chosen.map(|item| item.value.clone())
}
