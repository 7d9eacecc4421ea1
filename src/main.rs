use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use hass_agent::config::{self, Config, DEFAULT_CONFIG_FILE};
use hass_agent::sensor::Sensor;
use hass_agent::sensor::bme280::BME280;
use hass_agent::sensor::dummy::DummySensor;
use hass_agent::sink::influx::InfluxSink;
use hass_agent::sink::mqtt::{Discovery, MqttSink};
use hass_agent::{Agent, SourceKind};
use log::{info, warn};
use rppal::i2c::I2c;

/// BME280 遥测代理，发布到 Home Assistant(MQTT) 和 InfluxDB
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// 使用合成信号代替BME280传感器
    #[arg(long)]
    dummy: bool,
    /// 采集间隔(秒)，覆盖配置文件
    #[arg(short, long)]
    interval: Option<u64>,
    /// 只采集一次就退出
    #[arg(long)]
    once: bool,
    /// 日志详细程度(-v 输出原始数据和校准参数, -vv 更多)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_module("hass_agent", level)
        .parse_default_env()
        .init();

    // 读取配置文件，文件不存在时全部使用默认值
    let mut file_config = if cli.config.exists() {
        Config::load(&cli.config)
            .with_context(|| format!("无法解析配置文件{}", cli.config.display()))?
    } else {
        warn!("配置文件{}不存在, 使用默认配置", cli.config.display());
        Config::default()
    };
    if let Some(interval) = cli.interval {
        file_config.interval = Some(interval);
    }
    let config = file_config.resolve(&config::hostname())?;
    info!(
        "名称: {}, 位置: {}, 主机名: {}",
        config.name, config.location, config.hostname
    );

    // 创建数据来源
    let sensor: Box<dyn Sensor> = if cli.dummy {
        Box::new(DummySensor::new())
    } else {
        let i2c = I2c::with_bus(config.i2c_bus)
            .with_context(|| format!("无法打开I2C总线{}", config.i2c_bus))?;
        Box::new(BME280::new(i2c, config.i2c_address)?)
    };
    let kind: SourceKind = sensor.kind();

    // 创建发布目标
    let mut agent = Agent::new(config.clone(), sensor);
    if let Some(settings) = &config.mqtt {
        let sink = MqttSink::connect(settings, Discovery::new(&config, kind))?;
        agent.add_sink(Box::new(sink));
    }
    if config.influx.is_some() {
        agent.add_sink(Box::new(InfluxSink::connect(&config, kind)?));
    }

    // Ctrl-C 和 SIGTERM 都会打断等待
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("无法注册退出信号处理")?;

    let result = if cli.once {
        agent.run_cycle().map(|_| ())
    } else {
        agent.run(&rx)
    };

    agent.shutdown();
    result.context("采集异常终止")?;

    // OK
    Ok(())
}
