use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};

use super::Sink;
use crate::config::{AgentConfig, InfluxSettings};
use crate::error::AgentError;
use crate::measurement::{Measurement, SourceKind};

/// 一个时序数据点
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// measurement 名称
    pub measurement: String,
    /// 标签: source, hostname, location
    pub tags: Vec<(&'static str, String)>,
    /// 字段: temperature, pressure, humidity
    pub fields: Vec<(&'static str, f64)>,
    /// 时间戳
    pub time: DateTime<Utc>,
}

/// 转义 measurement 名称中的反斜杠、逗号和空格
fn escape_measurement(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
}

/// 转义标签键值中的反斜杠、逗号、等号和空格
///
/// 反斜杠必须最先转义，否则会把后面加入的转义符再转义一次
fn escape_tag(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

impl Point {
    pub fn new(
        measurement: &str,
        config: &AgentConfig,
        value: &Measurement,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: vec![
                ("source", config.name.clone()),
                ("hostname", config.hostname.clone()),
                ("location", config.location.clone()),
            ],
            fields: vec![
                ("temperature", value.temperature),
                ("pressure", value.pressure),
                ("humidity", value.humidity),
            ],
            time,
        }
    }

    /// 是否至少有一个可以写入的字段
    pub fn has_finite_fields(&self) -> bool {
        self.fields.iter().any(|(_, value)| value.is_finite())
    }

    /// 转换为 InfluxDB 行协议，时间戳精度为纳秒
    ///
    /// NaN 和无穷大不能写入，这些字段会被跳过
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);
        for (key, value) in &self.tags {
            // 空标签值在行协议中是非法的
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(&escape_tag(value));
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .filter(|(_, value)| value.is_finite())
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));

        // 超出 i64 纳秒范围(2262年以后)时不带时间戳，由服务器补齐
        if let Some(nanos) = self.time.timestamp_nanos_opt() {
            line.push(' ');
            line.push_str(&nanos.to_string());
        }
        line
    }
}

/// 写入 InfluxDB 1.x 的目标
pub struct InfluxSink {
    agent: ureq::Agent,
    base_url: String,
    settings: InfluxSettings,
    measurement: &'static str,
    config: AgentConfig,
}

impl InfluxSink {
    /// 创建InfluxDB连接，并列出服务器上的数据库
    pub fn connect(config: &AgentConfig, kind: SourceKind) -> Result<Self, AgentError> {
        let settings = config
            .influx
            .clone()
            .ok_or_else(|| AgentError::Config("未配置influxServer".to_string()))?;

        let base_url = if settings.server.starts_with("http://")
            || settings.server.starts_with("https://")
        {
            settings.server.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{}", settings.server, settings.port)
        };

        let sink = Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(10))
                .build(),
            base_url,
            settings,
            measurement: kind.measurement_name(),
            config: config.clone(),
        };

        let databases = sink.list_databases()?;
        info!("InfluxDB数据库列表: {}", databases);

        Ok(sink)
    }

    /// 附加认证参数
    fn with_auth(&self, request: ureq::Request) -> ureq::Request {
        match (&self.settings.user, &self.settings.pass) {
            (Some(user), Some(pass)) => request.query("u", user).query("p", pass),
            _ => request,
        }
    }

    fn sink_error(err: impl std::fmt::Display) -> AgentError {
        AgentError::Sink {
            sink: "InfluxDB",
            message: err.to_string(),
        }
    }

    /// 查询数据库列表，返回服务器的原始JSON
    pub fn list_databases(&self) -> Result<String, AgentError> {
        let request = self
            .agent
            .get(&format!("{}/query", self.base_url))
            .query("q", "SHOW DATABASES");
        self.with_auth(request)
            .call()
            .map_err(Self::sink_error)?
            .into_string()
            .map_err(Self::sink_error)
    }

    /// 写入一个数据点
    pub fn write_point(&self, point: &Point) -> Result<(), AgentError> {
        if !point.has_finite_fields() {
            return Err(Self::sink_error("数据点没有有效字段"));
        }
        let line = point.to_line_protocol();
        debug!("写入InfluxDB: {}", line);
        let request = self
            .agent
            .post(&format!("{}/write", self.base_url))
            .query("db", &self.settings.database)
            .query("precision", "ns");
        self.with_auth(request)
            .send_string(&line)
            .map_err(Self::sink_error)?;
        Ok(())
    }
}

impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "InfluxDB"
    }

    fn publish(&mut self, measurement: &Measurement) -> Result<(), AgentError> {
        let point = Point::new(self.measurement, &self.config, measurement, Utc::now());
        self.write_point(&point)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::Config;

    fn point(yaml: &str) -> Point {
        let config = Config::from_yaml_str(yaml).unwrap().resolve("pi4").unwrap();
        let value = Measurement {
            temperature: 21.5,
            pressure: 1013.25,
            humidity: 40.0,
        };
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Point::new(SourceKind::Bme280.measurement_name(), &config, &value, time)
    }

    #[test]
    fn point_carries_tags_and_fields() {
        let point = point("name: attic\nlocation: roof");
        assert_eq!(
            point.tags,
            vec![
                ("source", "attic".to_string()),
                ("hostname", "pi4".to_string()),
                ("location", "roof".to_string()),
            ]
        );
        assert_eq!(point.fields.len(), 3);
    }

    #[test]
    fn line_protocol_escapes_spaces() {
        let line = point("name: attic\nlocation: ground floor, east").to_line_protocol();
        assert_eq!(
            line,
            "BME280\\ Sensor,source=attic,hostname=pi4,location=ground\\ floor\\,\\ east \
             temperature=21.5,pressure=1013.25,humidity=40 1704067200000000000"
        );
    }

    #[test]
    fn dummy_points_use_their_own_measurement() {
        assert_eq!(
            escape_measurement(SourceKind::Dummy.measurement_name()),
            "Dummy\\ BME280\\ Sensor"
        );
        assert_eq!(escape_tag("a=b"), "a\\=b");
    }

    #[test]
    fn trailing_backslash_does_not_escape_the_separator() {
        assert_eq!(escape_tag("C:\\temp\\"), "C:\\\\temp\\\\");
        assert_eq!(escape_tag("a\\,b"), "a\\\\\\,b");
        assert_eq!(escape_measurement("x\\ y"), "x\\\\\\ y");

        let line = point("name: attic\\\nlocation: roof").to_line_protocol();
        assert!(line.starts_with("BME280\\ Sensor,source=attic\\\\,hostname=pi4,"));
    }

    #[test]
    fn non_finite_fields_are_skipped() {
        let mut point = point("name: attic");
        point.fields[0].1 = f64::NAN;
        point.fields[1].1 = f64::INFINITY;
        let line = point.to_line_protocol();
        assert!(line.contains(" humidity=40 "));
        assert!(!line.contains("NaN"));
        assert!(!line.contains("inf"));
        assert!(point.has_finite_fields());

        point.fields[2].1 = f64::NEG_INFINITY;
        assert!(!point.has_finite_fields());
    }
}
