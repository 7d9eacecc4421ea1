use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use rumqttc::{Client, Connection, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;

use super::Sink;
use crate::config::{AgentConfig, MqttSettings};
use crate::error::AgentError;
use crate::measurement::{Measurement, SourceKind};

/// Home Assistant 上线/下线通知主题
pub const STATUS_TOPIC: &str = "homeassistant/status";

/// 可用性消息
const ONLINE: &str = "online";
const OFFLINE: &str = "offline";

/// 发布的物理量: (device_class, 显示名称, 单位)
const QUANTITIES: [(&str, &str, &str); 3] = [
    ("temperature", "Temperature", "°C"),
    ("pressure", "Pressure", "hPa"),
    ("humidity", "Humidity", "%"),
];

/// Home Assistant 自动发现消息体
#[derive(Debug, Serialize)]
struct DiscoveryPayload<'a> {
    device_class: &'a str,
    name: String,
    unique_id: String,
    state_topic: &'a str,
    unit_of_measurement: &'a str,
    value_template: String,
    availability_topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expire_after: Option<u32>,
}

/// 自动发现相关的主题和参数
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    /// 传感器名称
    pub name: String,
    /// 状态主题
    pub state_topic: String,
    /// 可用性主题
    pub availability_topic: String,
    /// 数值过期时间(秒)
    pub expire_after: Option<u32>,
}

impl Discovery {
    pub fn new(config: &AgentConfig, kind: SourceKind) -> Self {
        Self {
            name: config.name.clone(),
            state_topic: format!(
                "homeassistant/sensor/{}{}/state",
                kind.state_topic_prefix(),
                config.hostname
            ),
            availability_topic: format!("homeassistant/sensor/{}/availability", config.name),
            expire_after: kind.expire_after(),
        }
    }

    /// 每个物理量的配置主题和消息体
    pub fn config_messages(&self) -> Vec<(String, String)> {
        QUANTITIES
            .iter()
            .map(|&(quantity, title, unit)| {
                let topic = format!("homeassistant/sensor/{}/{}/config", self.name, quantity);
                let payload = DiscoveryPayload {
                    device_class: quantity,
                    name: format!("{} {}", title, self.name),
                    unique_id: format!("{}_{}", quantity, self.name),
                    state_topic: &self.state_topic,
                    unit_of_measurement: unit,
                    value_template: format!("{{{{ value_json.{} }}}}", quantity),
                    availability_topic: &self.availability_topic,
                    expire_after: self.expire_after,
                };
                // 只包含字符串和整数，序列化不会失败
                (topic, serde_json::to_string(&payload).unwrap_or_default())
            })
            .collect()
    }
}

/// 收到的消息是否要求重新发布自动发现信息
///
/// 只处理 Home Assistant 重新上线的通知，忽略保留消息
pub fn is_announce_request(topic: &str, payload: &[u8], retain: bool) -> bool {
    !retain && topic == STATUS_TOPIC && payload == ONLINE.as_bytes()
}

/// 发布自动发现信息和上线状态
///
/// 网络线程中也会调用，使用非阻塞发布避免请求队列满时死锁
fn announce(client: &Client, discovery: &Discovery) -> Result<(), rumqttc::ClientError> {
    info!("发布Home Assistant自动发现信息");
    for (topic, payload) in discovery.config_messages() {
        debug!("发送 {} : {}", topic, payload);
        client.try_publish(topic, QoS::AtLeastOnce, true, payload)?;
    }
    client.try_publish(&discovery.availability_topic, QoS::AtLeastOnce, true, ONLINE)
}

/// 订阅 Home Assistant 状态主题并发布自动发现信息
fn subscribe_and_announce(client: &Client, discovery: &Discovery) {
    if let Err(err) = client.try_subscribe(STATUS_TOPIC, QoS::AtLeastOnce) {
        warn!("订阅{}失败: {}", STATUS_TOPIC, err);
    }
    if let Err(err) = announce(client, discovery) {
        warn!("发布自动发现信息失败: {}", err);
    }
}

/// MQTT网络线程
fn network_loop(
    mut connection: Connection,
    client: Client,
    discovery: Arc<Discovery>,
    running: Arc<AtomicBool>,
) {
    // 第一次连接的订阅和自动发现已经在 connect 中排队
    let mut reconnect = false;
    for notification in connection.iter() {
        match notification {
            // 重新连接后订阅状态主题并发布自动发现信息
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("已连接MQTT服务器: {:?}", ack.code);
                if reconnect {
                    subscribe_and_announce(&client, &discovery);
                }
                reconnect = true;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("收到消息: {} {:?}", publish.topic, publish.payload);
                if is_announce_request(&publish.topic, &publish.payload, publish.retain) {
                    info!("Home Assistant 重新上线");
                    if let Err(err) = announce(&client, &discovery) {
                        warn!("发布自动发现信息失败: {}", err);
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("已断开MQTT连接");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                // 重连由客户端库在下一次轮询时完成
                warn!("MQTT连接异常: {}", err);
                thread::sleep(Duration::from_secs(5));
            }
        }
    }
}

/// 发布到 Home Assistant 的 MQTT 目标
pub struct MqttSink {
    client: Client,
    discovery: Arc<Discovery>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MqttSink {
    /// 连接MQTT服务器并启动后台网络线程
    pub fn connect(settings: &MqttSettings, discovery: Discovery) -> Result<Self, AgentError> {
        let mut options = MqttOptions::new(
            format!("hass-agent-{}", discovery.name),
            settings.server.clone(),
            settings.port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        if let Some((user, pass)) = &settings.credentials {
            options.set_credentials(user.clone(), pass.clone());
        }
        // 异常断开时由服务器代为发布下线状态
        options.set_last_will(LastWill::new(
            discovery.availability_topic.clone(),
            OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));

        let (client, connection) = Client::new(options, 16);
        // 自动发现信息必须排在第一条状态消息之前
        subscribe_and_announce(&client, &discovery);
        let discovery = Arc::new(discovery);
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let client = client.clone();
            let discovery = discovery.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("mqtt".to_string())
                .spawn(move || network_loop(connection, client, discovery, running))
                .map_err(|err| AgentError::Sink {
                    sink: "MQTT",
                    message: err.to_string(),
                })?
        };
        info!("MQTT已初始化: {}:{}", settings.server, settings.port);

        Ok(Self {
            client,
            discovery,
            running,
            worker: Some(worker),
        })
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }
}

impl Sink for MqttSink {
    fn name(&self) -> &'static str {
        "MQTT"
    }

    fn publish(&mut self, measurement: &Measurement) -> Result<(), AgentError> {
        let payload = measurement.to_json();
        debug!("发布 {} : {}", self.discovery.state_topic, payload);
        // 服务器不可达时请求会在队列中堆积，不能阻塞采集循环
        self.client
            .try_publish(&self.discovery.state_topic, QoS::AtMostOnce, false, payload)
            .map_err(|err| AgentError::Sink {
                sink: "MQTT",
                message: err.to_string(),
            })
    }

    fn close(&mut self) -> Result<(), AgentError> {
        info!("停止MQTT");
        self.running.store(false, Ordering::Release);

        // 下线消息必须排在断开请求之前
        let offline = self.client.try_publish(
            &self.discovery.availability_topic,
            QoS::AtLeastOnce,
            true,
            OFFLINE,
        );
        let disconnect = self.client.try_disconnect();

        // 断开请求没有进入队列时网络线程不会退出，不能等待
        if disconnect.is_ok() {
            if let Some(worker) = self.worker.take() {
                if worker.join().is_err() {
                    warn!("MQTT网络线程异常退出");
                }
            }
            info!("MQTT已停止");
        }

        offline.and(disconnect).map_err(|err| AgentError::Sink {
            sink: "MQTT",
            message: err.to_string(),
        })
    }
}
