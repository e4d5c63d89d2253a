//! 执行器链路（ActuatorFlow）
//!
//! 总线指令 -> 校验 -> 编码 -> 写设备 -> 可选回执。
//!
//! - `value` 指令立即写入，并清除该 key 的设定值/时间表计划
//! - `setpoint` / `schedule` 指令先整体校验，当前生效项立即写入，之后胜出值变化时再写入
//! - 每次写设备前先确保传输已连接（断线后按需重连）
//! - 校验失败与写入失败都在 `<指令 topic>/error` 上报，不自动重试

mod command;
mod error;
mod flow;
mod schedule;

pub use command::{ActuatorCommand, PlanItem, parse_command};
pub use error::ActuatorError;
pub use flow::{ActuatorFlow, ActuatorOutcome, ActuatorSettings};
pub use schedule::{DueWrite, ScheduleBook};
