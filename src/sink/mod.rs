use crate::error::AgentError;
use crate::measurement::Measurement;

pub mod influx;
pub mod mqtt;

/// 测量数据的发布目标
pub trait Sink {
    /// 目标名称，用于日志
    fn name(&self) -> &'static str;

    /// 发布一次测量数据
    fn publish(&mut self, measurement: &Measurement) -> Result<(), AgentError>;

    /// 正常退出前调用
    fn close(&mut self) -> Result<(), AgentError> {
        Ok(())
    }
}
