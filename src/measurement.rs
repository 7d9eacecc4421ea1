use serde::Serialize;

/// 一次测量得到的物理量
///
/// 每个测量周期重新生成，发布完成后即丢弃
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    /// 温度(°C)，不做范围限制
    pub temperature: f64,
    /// 大气压力(hPa)
    pub pressure: f64,
    /// 相对湿度(%RH)，范围 0.0-100.0
    pub humidity: f64,
}

impl Measurement {
    /// 序列化为状态主题使用的JSON
    pub fn to_json(&self) -> String {
        // 三个f64字段的结构体序列化不会失败
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 测量数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// 真实的BME280传感器
    Bme280,
    /// 合成信号发生器，用于在没有硬件时测试下游
    Dummy,
}

impl SourceKind {
    /// 状态主题中主机名前面的前缀
    pub fn state_topic_prefix(&self) -> &'static str {
        match self {
            Self::Bme280 => "bme280_",
            Self::Dummy => "dummy_bme280_",
        }
    }

    /// InfluxDB measurement 名称
    pub fn measurement_name(&self) -> &'static str {
        match self {
            Self::Bme280 => "BME280 Sensor",
            Self::Dummy => "Dummy BME280 Sensor",
        }
    }

    /// 多少秒没有新数据后，Home Assistant 认为数值过期
    ///
    /// 略大于默认的120秒采集间隔的3倍
    pub fn expire_after(&self) -> Option<u32> {
        match self {
            Self::Bme280 => Some(370),
            Self::Dummy => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_payload_has_three_float_fields() {
        let m = Measurement {
            temperature: 21.5,
            pressure: 1013.25,
            humidity: 40.0,
        };
        let value: serde_json::Value = serde_json::from_str(&m.to_json()).unwrap();
        assert_eq!(value["temperature"], 21.5);
        assert_eq!(value["pressure"], 1013.25);
        assert_eq!(value["humidity"], 40.0);
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn dummy_source_never_expires() {
        assert_eq!(SourceKind::Bme280.expire_after(), Some(370));
        assert_eq!(SourceKind::Dummy.expire_after(), None);
        assert_eq!(SourceKind::Dummy.state_topic_prefix(), "dummy_bme280_");
    }
}
