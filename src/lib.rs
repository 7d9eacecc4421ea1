//! BME280 遥测代理
//!
//! 周期性读取 BME280 温度、压力、湿度传感器，换算为物理量后
//! 发布到 Home Assistant(MQTT) 和 InfluxDB。

pub mod agent;
pub mod config;
pub mod error;
pub mod measurement;
pub mod sensor;
pub mod sink;

pub use agent::Agent;
pub use config::{AgentConfig, Config};
pub use error::AgentError;
pub use measurement::{Measurement, SourceKind};
