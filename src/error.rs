use std::fmt::Debug;

/// 遥测代理错误类型
#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 总线读写失败，或者读取到的字节数与预期不符
    ///
    /// 只影响当前测量周期，下一个周期会重试
    DeviceIo {
        /// 出错时访问的寄存器地址
        register: u8,
        /// 错误描述
        message: String,
    },
    /// 芯片ID不是BME280(0x60)
    UnsupportedChip { chip_id: u8 },
    /// 配置文件缺失或者格式错误
    Config(String),
    /// MQTT/InfluxDB 发布失败
    Sink {
        /// 发布目标名称
        sink: &'static str,
        /// 错误描述
        message: String,
    },
}

impl AgentError {
    /// 构建总线错误
    pub fn device_io(register: u8, err: impl Debug) -> Self {
        Self::DeviceIo {
            register,
            message: format!("{:?}", err),
        }
    }

    /// 构建字节数不匹配错误
    pub fn short_read(register: u8, expected: usize, actual: usize) -> Self {
        Self::DeviceIo {
            register,
            message: format!("预期读取{}字节, 实际读取{}字节", expected, actual),
        }
    }

    /// 是否为总线错误
    pub fn is_device_io(&self) -> bool {
        matches!(self, Self::DeviceIo { .. })
    }

    /// 是否可以在下一个测量周期重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeviceIo { .. } | Self::Sink { .. })
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceIo { register, message } => {
                write!(f, "总线通信失败(寄存器0x{:02X}): {}", register, message)
            }
            Self::UnsupportedChip { chip_id } => {
                write!(f, "不支持的芯片ID: 0x{:02X}, 预期为BME280(0x60)", chip_id)
            }
            Self::Config(message) => write!(f, "配置错误: {}", message),
            Self::Sink { sink, message } => write!(f, "发布到{}失败: {}", sink, message),
        }
    }
}

impl std::error::Error for AgentError {}
