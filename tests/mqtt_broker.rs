use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use hass_agent::config::{Config, MqttSettings};
use hass_agent::sink::Sink;
use hass_agent::sink::mqtt::{Discovery, MqttSink, STATUS_TOPIC};
use hass_agent::{Measurement, SourceKind};

/// 服务器收到的报文
#[derive(Debug, Clone, PartialEq)]
enum Received {
    Subscribe(String),
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
    Disconnect,
}

/// 读取一个MQTT报文，返回 (固定报头首字节, 可变报头+载荷)
fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut header = [0u8; 1];
    stream.read_exact(&mut header).ok()?;

    // 剩余长度是变长编码，每字节7位
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).ok()?;
        length |= ((byte[0] & 0x7F) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).ok()?;
    Some((header[0], body))
}

/// 只接受一个客户端的MQTT服务器，直到收到 DISCONNECT 或连接关闭
fn serve_one(listener: TcpListener) -> Vec<Received> {
    let (mut stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut received = Vec::new();
    while let Some((header, body)) = read_packet(&mut stream) {
        match header >> 4 {
            // CONNECT -> CONNACK
            1 => {
                let _ = stream.write_all(&[0x20, 0x02, 0x00, 0x00]);
            }
            // PUBLISH
            3 => {
                let qos = (header >> 1) & 0x03;
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).to_string();
                let mut offset = 2 + topic_len;
                if qos > 0 {
                    // PUBACK
                    let _ = stream.write_all(&[0x40, 0x02, body[offset], body[offset + 1]]);
                    offset += 2;
                }
                received.push(Received::Publish {
                    topic,
                    payload: String::from_utf8_lossy(&body[offset..]).to_string(),
                    retain: header & 0x01 == 0x01,
                });
            }
            // SUBSCRIBE -> SUBACK
            8 => {
                let topic_len = u16::from_be_bytes([body[2], body[3]]) as usize;
                let topic = String::from_utf8_lossy(&body[4..4 + topic_len]).to_string();
                let _ = stream.write_all(&[0x90, 0x03, body[0], body[1], 0x01]);
                received.push(Received::Subscribe(topic));
            }
            // DISCONNECT
            14 => {
                received.push(Received::Disconnect);
                break;
            }
            _ => {}
        }
    }
    received
}

fn start_broker() -> (u16, thread::JoinHandle<Vec<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (port, thread::spawn(move || serve_one(listener)))
}

fn connect(port: u16, kind: SourceKind) -> MqttSink {
    let config = Config::from_yaml_str("name: attic")
        .unwrap()
        .resolve("pi4")
        .unwrap();
    let settings = MqttSettings {
        server: "127.0.0.1".to_string(),
        port,
        credentials: None,
    };
    MqttSink::connect(&settings, Discovery::new(&config, kind)).unwrap()
}

fn published(received: &[Received]) -> Vec<(&str, &str, bool)> {
    received
        .iter()
        .filter_map(|packet| match packet {
            Received::Publish {
                topic,
                payload,
                retain,
            } => Some((topic.as_str(), payload.as_str(), *retain)),
            _ => None,
        })
        .collect()
}

#[test]
fn single_cycle_announces_before_state_and_offline() {
    let (port, broker) = start_broker();

    // 等同于 --dummy --once: 连接、发布一次、关闭
    let mut sink = connect(port, SourceKind::Dummy);
    sink.publish(&Measurement {
        temperature: 21.5,
        pressure: 1013.25,
        humidity: 40.0,
    })
    .unwrap();
    sink.close().unwrap();

    let received = broker.join().unwrap();
    assert_eq!(received[0], Received::Subscribe(STATUS_TOPIC.to_string()));
    assert_eq!(received.last(), Some(&Received::Disconnect));

    let messages = published(&received);
    let topics: Vec<&str> = messages.iter().map(|(topic, _, _)| *topic).collect();
    assert_eq!(
        topics,
        [
            "homeassistant/sensor/attic/temperature/config",
            "homeassistant/sensor/attic/pressure/config",
            "homeassistant/sensor/attic/humidity/config",
            "homeassistant/sensor/attic/availability",
            "homeassistant/sensor/dummy_bme280_pi4/state",
            "homeassistant/sensor/attic/availability",
        ]
    );

    // 自动发现和可用性消息是保留消息，状态消息不是
    assert!(messages[..4].iter().all(|(_, _, retain)| *retain));
    assert_eq!(messages[3].1, "online");
    assert!(!messages[4].2);
    assert_eq!(messages[5], ("homeassistant/sensor/attic/availability", "offline", true));

    let state: serde_json::Value = serde_json::from_str(messages[4].1).unwrap();
    assert_eq!(state["temperature"], 21.5);
    assert_eq!(state["humidity"], 40.0);
}

#[test]
fn close_without_measurements_still_announces() {
    let (port, broker) = start_broker();

    let mut sink = connect(port, SourceKind::Bme280);
    sink.close().unwrap();

    let received = broker.join().unwrap();
    let messages = published(&received);
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0].0, "homeassistant/sensor/attic/temperature/config");
    let config: serde_json::Value = serde_json::from_str(messages[0].1).unwrap();
    assert_eq!(config["expire_after"], 370);
    assert_eq!(messages[3], ("homeassistant/sensor/attic/availability", "online", true));
    assert_eq!(messages[4], ("homeassistant/sensor/attic/availability", "offline", true));
}
