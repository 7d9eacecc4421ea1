use std::fs;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::error::AgentError;

/// 默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "mqtt-agent.yaml";

/// 配置文件内容
///
/// 字段名与配置文件中的键一致（驼峰命名），所有字段都是可选的
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// 传感器名称，缺省时使用主机名
    pub name: Option<String>,
    /// 安装位置，缺省时使用主机名
    pub location: Option<String>,

    /// MQTT服务器地址，存在时启用MQTT
    pub mqtt_server: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_user: Option<String>,
    pub mqtt_pass: Option<String>,

    /// InfluxDB服务器地址，存在时启用InfluxDB
    pub influx_server: Option<String>,
    pub influx_port: Option<u16>,
    pub influx_user: Option<String>,
    pub influx_pass: Option<String>,
    #[serde(rename = "influxDB")]
    pub influx_db: Option<String>,

    /// 采集间隔(秒)
    pub interval: Option<u64>,
    /// I2C总线编号
    pub i2c_bus: Option<u8>,
    /// BME280 I2C地址
    pub i2c_address: Option<u8>,
}

/// MQTT连接参数
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub server: String,
    pub port: u16,
    /// 用户名和密码都存在时才进行认证
    pub credentials: Option<(String, String)>,
}

/// InfluxDB连接参数
#[derive(Debug, Clone, PartialEq)]
pub struct InfluxSettings {
    pub server: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub database: String,
}

/// 补全默认值后的代理配置
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// 传感器名称
    pub name: String,
    /// 安装位置
    pub location: String,
    /// 本机主机名
    pub hostname: String,
    /// 采集间隔
    pub interval: Duration,
    /// I2C总线编号
    pub i2c_bus: u8,
    /// BME280 I2C地址
    pub i2c_address: u8,
    pub mqtt: Option<MqttSettings>,
    pub influx: Option<InfluxSettings>,
}

impl Config {
    /// 解析YAML文本
    pub fn from_yaml_str(text: &str) -> Result<Self, AgentError> {
        // 空文件等价于没有任何配置
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|err| AgentError::Config(err.to_string()))
    }

    /// 读取配置文件
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| AgentError::Config(format!("无法读取{}: {}", path.display(), err)))?;
        Self::from_yaml_str(&text)
    }

    /// 补全默认值
    ///
    /// - name/location 缺省时使用主机名
    /// - 配置了 influxServer 时必须同时配置 influxDB
    pub fn resolve(self, hostname: &str) -> Result<AgentConfig, AgentError> {
        let mqtt = match self.mqtt_server {
            Some(server) => {
                info!("Home Assistant MQTT 已启用");
                Some(MqttSettings {
                    server,
                    port: self.mqtt_port.unwrap_or(1883),
                    credentials: match (self.mqtt_user, self.mqtt_pass) {
                        (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                            Some((user, pass))
                        }
                        _ => None,
                    },
                })
            }
            None => None,
        };

        let influx = match self.influx_server {
            Some(server) => {
                info!("InfluxDB 已启用");
                let database = self.influx_db.ok_or_else(|| {
                    AgentError::Config("配置了influxServer但缺少influxDB".to_string())
                })?;
                Some(InfluxSettings {
                    server,
                    port: self.influx_port.unwrap_or(8086),
                    user: self.influx_user,
                    pass: self.influx_pass,
                    database,
                })
            }
            None => None,
        };

        let interval = self.interval.unwrap_or(120);
        if interval == 0 {
            return Err(AgentError::Config("interval 必须大于0".to_string()));
        }

        Ok(AgentConfig {
            name: self.name.unwrap_or_else(|| hostname.to_string()),
            location: self.location.unwrap_or_else(|| hostname.to_string()),
            hostname: hostname.to_string(),
            interval: Duration::from_secs(interval),
            i2c_bus: self.i2c_bus.unwrap_or(1),
            i2c_address: self.i2c_address.unwrap_or(0x76),
            mqtt,
            influx,
        })
    }
}

/// 本机主机名
pub fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
