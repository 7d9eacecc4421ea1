use std::sync::mpsc::{Receiver, RecvTimeoutError};

use log::{error, info, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::measurement::Measurement;
use crate::sensor::Sensor;
use crate::sink::Sink;

/// 遥测代理会话
///
/// 持有配置、数据来源和所有发布目标，替代全局状态
pub struct Agent {
    config: AgentConfig,
    sensor: Box<dyn Sensor>,
    sinks: Vec<Box<dyn Sink>>,
}

impl Agent {
    pub fn new(config: AgentConfig, sensor: Box<dyn Sensor>) -> Self {
        Self {
            config,
            sensor,
            sinks: Vec::new(),
        }
    }

    /// 添加发布目标
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        info!("已启用发布目标: {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// 执行一个测量周期
    ///
    /// 测量失败时直接返回错误；某个目标发布失败只记录日志，
    /// 不影响其他目标
    pub fn run_cycle(&mut self) -> Result<Measurement, AgentError> {
        let m = self.sensor.measure()?;
        info!(
            "温度: {:.2}°C, 压力: {:.2}hPa, 湿度: {:.2}%",
            m.temperature, m.pressure, m.humidity
        );

        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.publish(&m) {
                warn!("{}", err);
            }
        }

        Ok(m)
    }

    /// 循环采集，直到收到退出信号
    ///
    /// 总线错误只结束当前周期，下一个周期重试；其他错误终止循环
    pub fn run(&mut self, shutdown: &Receiver<()>) -> Result<(), AgentError> {
        info!("开始采集, 间隔: {:?}", self.config.interval);
        loop {
            match self.run_cycle() {
                Ok(_) => {}
                Err(err) if err.is_retryable() => {
                    error!("本次测量失败: {}", err);
                }
                Err(err) => return Err(err),
            }

            // 等待下一个周期，期间可以被退出信号打断
            match shutdown.recv_timeout(self.config.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("收到退出信号");
                    return Ok(());
                }
            }
        }
    }

    /// 关闭所有发布目标
    pub fn shutdown(mut self) {
        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.close() {
                warn!("{}", err);
            }
        }
    }
}
