use std::thread;
use std::time::Duration;

use embedded_hal::i2c::I2c;
use log::{debug, info, trace};

use super::Sensor;
use crate::error::AgentError;
use crate::measurement::{Measurement, SourceKind};

mod calibration;
mod compensation;

pub use calibration::{CalibrationSet, read_calibration};
pub use compensation::{
    RawSample, compensate, compensate_humidity, compensate_pressure, compensate_temperature,
};

/// BME280 默认I2C地址（SDO接地）
pub const DEFAULT_ADDRESS: u8 = 0x76;
/// BME280 芯片ID
pub const CHIP_ID_BME280: u8 = 0x60;

/// 芯片ID寄存器，紧跟着的 0xD1 为版本号
const REG_CHIP_ID: u8 = 0xD0;
/// 软复位寄存器
const REG_RESET: u8 = 0xE0;
/// 湿度采样率寄存器
const REG_CTRL_HUM: u8 = 0xF2;
/// 状态寄存器
const REG_STATUS: u8 = 0xF3;
/// 温度、压力采样率和工作模式寄存器
const REG_CTRL_MEAS: u8 = 0xF4;
/// 测量数据起始寄存器 (0xF7-0xFE)
const REG_DATA: u8 = 0xF7;
/// 软复位命令
const SOFT_RESET_CMD: u8 = 0xB6;

/// 过采样倍数
///
/// 枚举值就是写入寄存器的编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    /// 跳过该通道，输出固定为 0x80000
    Skipped = 0,
    X1 = 1,
    X2 = 2,
    X4 = 3,
    X8 = 4,
    X16 = 5,
}

impl Oversampling {
    /// 寄存器编码
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// 实际采样次数
    pub fn factor(self) -> u32 {
        match self {
            Self::Skipped => 0,
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
            Self::X16 => 16,
        }
    }
}

/// 工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 休眠
    Sleep = 0,
    /// 单次测量，测量完成后自动回到休眠
    Forced = 1,
    /// 周期测量
    Normal = 3,
}

/// 采集配置
///
/// 默认三个通道都是2倍过采样、单次测量模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    pub temperature: Oversampling,
    pub pressure: Oversampling,
    pub humidity: Oversampling,
    pub mode: Mode,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: Oversampling::X2,
            pressure: Oversampling::X2,
            humidity: Oversampling::X2,
            mode: Mode::Forced,
        }
    }
}

impl SamplingConfig {
    /// 写入 ctrl_hum(0xF2) 的值
    pub fn ctrl_hum(&self) -> u8 {
        self.humidity.bits()
    }

    /// 写入 ctrl_meas(0xF4) 的值: osrs_t[7:5] | osrs_p[4:2] | mode[1:0]
    pub fn ctrl_meas(&self) -> u8 {
        (self.temperature.bits() << 5) | (self.pressure.bits() << 2) | self.mode as u8
    }

    /// 测量所需的最长时间(ms)
    ///
    /// 数据手册附录B: 1.25 + 2.3*T + (2.3*P + 0.575) + (2.3*H + 0.575)，
    /// 跳过的通道不计入
    pub fn settle_time_ms(&self) -> f64 {
        let mut wait = 1.25 + 2.3 * self.temperature.factor() as f64;
        if self.pressure != Oversampling::Skipped {
            wait += 2.3 * self.pressure.factor() as f64 + 0.575;
        }
        if self.humidity != Oversampling::Skipped {
            wait += 2.3 * self.humidity.factor() as f64 + 0.575;
        }
        wait
    }

    /// 测量所需的等待时间，向上取整到微秒
    pub fn settle_time(&self) -> Duration {
        Duration::from_micros((self.settle_time_ms() * 1000.0).ceil() as u64)
    }
}

/// 芯片身份信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipId {
    /// 芯片ID，BME280为0x60
    pub id: u8,
    /// 版本号
    pub version: u8,
}

/// BME280 大气压力、温度、湿度传感器封装对象
///
/// 独占总线句柄，一个测量周期内不允许其他访问
pub struct BME280<I2C> {
    /// I2C通信句柄
    i2c: I2C,
    /// I2C从设备地址
    /// - BME280的地址通常为: 0x76
    i2c_addr: u8,
    /// 采集配置
    sampling: SamplingConfig,
    /// 芯片身份
    chip: ChipId,
    /// 校准参数，会话期间不变
    calib: CalibrationSet,
}

/// 实现BME280传感器操作
impl<I2C: I2c> BME280<I2C> {
    /// 创建BME280传感器实例，使用默认采集配置
    pub fn new(i2c: I2C, i2c_addr: u8) -> Result<Self, AgentError> {
        Self::with_sampling(i2c, i2c_addr, SamplingConfig::default())
    }

    /// 创建BME280传感器实例
    ///
    /// 检查芯片ID，等待NVM就绪后读取校准数据
    pub fn with_sampling(
        mut i2c: I2C,
        i2c_addr: u8,
        sampling: SamplingConfig,
    ) -> Result<Self, AgentError> {
        // 传感器上电后必须等待2ms以上
        thread::sleep(Duration::from_millis(3));

        // 检查芯片ID
        let mut id = [0u8; 2];
        i2c.write_read(i2c_addr, &[REG_CHIP_ID], &mut id)
            .map_err(|err| AgentError::device_io(REG_CHIP_ID, err))?;
        let chip = ChipId {
            id: id[0],
            version: id[1],
        };
        info!("芯片ID: 0x{:02X}, 版本: 0x{:02X}", chip.id, chip.version);
        if chip.id != CHIP_ID_BME280 {
            return Err(AgentError::UnsupportedChip { chip_id: chip.id });
        }

        // 构建传感器实例
        let mut sensor = Self {
            i2c,
            i2c_addr,
            sampling,
            chip,
            calib: CalibrationSet::default(),
        };

        // 读取校准数据
        sensor.load_calibration()?;

        // OK
        Ok(sensor)
    }

    /// 芯片身份
    pub fn chip_id(&self) -> ChipId {
        self.chip
    }

    /// 校准参数
    pub fn calibration(&self) -> &CalibrationSet {
        &self.calib
    }

    /// 采集配置
    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    /// 释放总线句柄
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// 写单字节寄存器
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), AgentError> {
        self.i2c
            .write(self.i2c_addr, &[register, value])
            .map_err(|err| AgentError::device_io(register, err))
    }

    /// 从指定寄存器开始突发读取
    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), AgentError> {
        self.i2c
            .write_read(self.i2c_addr, &[register], buf)
            .map_err(|err| AgentError::device_io(register, err))
    }

    /// 等待NVM数据复制完成
    ///
    /// 状态寄存器第0位(im_update)为1时表示传感器正在更新校准数据
    fn wait_nvm_ready(&mut self) -> Result<(), AgentError> {
        let mut status = [0u8];
        for _ in 0..5 {
            self.read_registers(REG_STATUS, &mut status)?;
            if status[0] & 0x01 == 0 {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(2));
        }
        Err(AgentError::DeviceIo {
            register: REG_STATUS,
            message: "传感器正在更新校准数据".to_string(),
        })
    }

    /// 读取校准数据
    fn load_calibration(&mut self) -> Result<(), AgentError> {
        self.wait_nvm_ready()?;
        self.calib = read_calibration(&mut self.i2c, self.i2c_addr)?;
        debug!("校准参数: {:?}", self.calib);
        Ok(())
    }

    /// 触发一次测量并读取原始数据
    ///
    /// 写入采样率和模式，等待测量完成，再突发读取8字节
    pub fn read_raw(&mut self) -> Result<RawSample, AgentError> {
        // 湿度采样率必须在 ctrl_meas 之前写入才会生效
        self.write_register(REG_CTRL_HUM, self.sampling.ctrl_hum())?;
        self.write_register(REG_CTRL_MEAS, self.sampling.ctrl_meas())?;

        // 等待测量完成
        let settle = self.sampling.settle_time();
        trace!("等待测量完成: {:?}", settle);
        thread::sleep(settle);

        // 读取原始数据
        let mut data = [0u8; 8];
        self.read_registers(REG_DATA, &mut data)?;
        let raw = RawSample::from_bytes(&data);
        debug!("原始数据: {:?}", raw);

        // OK
        Ok(raw)
    }

    /// 读取补偿后的传感器数据
    ///
    /// - 返回（温度【℃】，空气压力【hPa】，湿度【%RH】）
    pub fn read(&mut self) -> Result<Measurement, AgentError> {
        let raw = self.read_raw()?;
        Ok(compensate(&raw, &self.calib))
    }

    /// 软复位传感器
    pub fn reset(&mut self) -> Result<(), AgentError> {
        self.write_register(REG_RESET, SOFT_RESET_CMD)?;

        // 等待重置完成
        thread::sleep(Duration::from_millis(5));

        // 重新读取校准数据
        self.load_calibration()
    }
}

impl<I2C: I2c> Sensor for BME280<I2C> {
    fn kind(&self) -> SourceKind {
        SourceKind::Bme280
    }

    fn measure(&mut self) -> Result<Measurement, AgentError> {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sampling_register_values() {
        let sampling = SamplingConfig::default();
        assert_eq!(sampling.ctrl_hum(), 0x02);
        // 010 010 01
        assert_eq!(sampling.ctrl_meas(), 0b0100_1001);
    }

    #[test]
    fn settle_time_for_double_oversampling() {
        let sampling = SamplingConfig::default();
        let wait = sampling.settle_time_ms();
        assert!((wait - 16.2).abs() < 1e-9);
        // 大于数据手册给出的典型测量时间
        assert!(wait > 14.0 && wait < 20.0);
        assert_eq!(sampling.settle_time(), Duration::from_micros(16200));
    }

    #[test]
    fn skipped_channels_shorten_settle_time() {
        let sampling = SamplingConfig {
            temperature: Oversampling::X1,
            pressure: Oversampling::Skipped,
            humidity: Oversampling::Skipped,
            mode: Mode::Forced,
        };
        assert!((sampling.settle_time_ms() - 3.55).abs() < 1e-9);

        let sampling = SamplingConfig {
            temperature: Oversampling::X16,
            pressure: Oversampling::X16,
            humidity: Oversampling::X16,
            mode: Mode::Normal,
        };
        assert_eq!(sampling.ctrl_meas(), (5 << 5) | (5 << 2) | 3);
        assert!((sampling.settle_time_ms() - 112.8).abs() < 1e-9);
    }
}
