use crate::error::AgentError;
use crate::measurement::{Measurement, SourceKind};

pub mod bme280;
pub mod dummy;

/// 测量数据来源
///
/// 真实传感器和合成信号发生器都实现该接口，代理只依赖这个接口
pub trait Sensor {
    /// 数据来源类型
    fn kind(&self) -> SourceKind;

    /// 执行一次完整的测量
    fn measure(&mut self) -> Result<Measurement, AgentError>;
}
