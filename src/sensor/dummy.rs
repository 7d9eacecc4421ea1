use std::f64::consts::PI;
use std::time::{SystemTime, UNIX_EPOCH};

use super::Sensor;
use crate::error::AgentError;
use crate::measurement::{Measurement, SourceKind};

/// 合成信号发生器
///
/// 用正弦波模拟温度、压力、湿度，在没有硬件时测试MQTT和InfluxDB
#[derive(Debug, Default)]
pub struct DummySensor {}

impl DummySensor {
    pub fn new() -> Self {
        Self {}
    }

    /// 计算指定时刻(UNIX秒)的模拟值
    ///
    /// - 温度: 15 ± 20 °C，周期1小时
    /// - 压力: 900 ± 100 hPa，周期半小时
    /// - 湿度: 80 ± 20 %RH，周期40分钟
    pub fn sample_at(seconds: f64) -> Measurement {
        let phase = |period: f64| 2.0 * PI * (seconds % period) / period;
        Measurement {
            temperature: 15.0 + 20.0 * phase(3600.0).sin(),
            pressure: 900.0 + 100.0 * phase(1800.0).sin(),
            humidity: 80.0 + 20.0 * phase(2400.0).sin(),
        }
    }
}

impl Sensor for DummySensor {
    fn kind(&self) -> SourceKind {
        SourceKind::Dummy
    }

    fn measure(&mut self) -> Result<Measurement, AgentError> {
        // 系统时钟早于1970年时按0处理
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Ok(Self::sample_at(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "{} != {}",
            actual,
            expected
        );
    }

    #[test]
    fn signals_start_at_their_midpoint() {
        let m = DummySensor::sample_at(7200.0);
        assert_close(m.temperature, 15.0);
        assert_close(m.pressure, 900.0);
        assert_close(m.humidity, 80.0);
    }

    #[test]
    fn signals_peak_at_quarter_period() {
        assert_close(DummySensor::sample_at(900.0).temperature, 35.0);
        assert_close(DummySensor::sample_at(450.0).pressure, 1000.0);
        assert_close(DummySensor::sample_at(600.0).humidity, 100.0);
        assert_close(DummySensor::sample_at(1800.0).humidity, 60.0);
    }

    #[test]
    fn humidity_stays_in_percent_range() {
        let mut sensor = DummySensor::new();
        let m = sensor.measure().unwrap();
        assert!((0.0..=100.0).contains(&m.humidity));
        assert_eq!(sensor.kind(), SourceKind::Dummy);
    }
}
