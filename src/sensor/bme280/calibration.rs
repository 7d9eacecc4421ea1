use embedded_hal::i2c::I2c;

use crate::error::AgentError;

/// 温度/压力校准参数起始地址 (0x88-0x9F)
pub const REG_CALIB_TP: u8 = 0x88;
/// 温度/压力校准参数长度
pub const CALIB_TP_LEN: usize = 24;
/// 湿度校准参数 H1 地址
pub const REG_CALIB_H1: u8 = 0xA1;
/// H1 长度
pub const CALIB_H1_LEN: usize = 1;
/// 湿度校准参数 H2-H6 起始地址 (0xE1-0xE7)
pub const REG_CALIB_H: u8 = 0xE1;
/// H2-H6 长度
pub const CALIB_H_LEN: usize = 7;

/// BME280传感器校准参数
///
/// 出厂时写入传感器 NVM 的补偿系数，每个会话只读取一次，
/// 之后不再变化（传感器只有在重新上电后才可能改变这些值）。
///
/// # 存储分布
/// - 温度/压力参数: 地址 0x88-0x9F (24字节)
/// - 湿度参数 H1: 地址 0xA1 (1字节)
/// - 湿度参数 H2-H6: 地址 0xE1-0xE7 (7字节)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationSet {
    // 温度校准参数组
    /// 温度校准系数 1 - 基准偏移量
    ///
    /// - **类型**: 无符号 16 位整数 (u16)
    /// - **地址**: 0x88-0x89 (小端序)
    pub dig_t1: u16,
    /// 温度校准系数 2 - 一阶灵敏度系数 (0x8A-0x8B)
    pub dig_t2: i16,
    /// 温度校准系数 3 - 二阶非线性系数 (0x8C-0x8D)
    pub dig_t3: i16,

    // 压力校准参数组
    /// 压力校准系数 1 - 基准缩放系数
    ///
    /// - **类型**: 无符号 16 位整数 (u16)
    /// - **地址**: 0x8E-0x8F (小端序)
    /// - **注意**: 为0时压力计算的分母为0，压力按0处理
    pub dig_p1: u16,
    /// 压力校准系数 2 (0x90-0x91)
    pub dig_p2: i16,
    /// 压力校准系数 3 (0x92-0x93)
    pub dig_p3: i16,
    /// 压力校准系数 4 (0x94-0x95)
    pub dig_p4: i16,
    /// 压力校准系数 5 (0x96-0x97)
    pub dig_p5: i16,
    /// 压力校准系数 6 (0x98-0x99)
    pub dig_p6: i16,
    /// 压力校准系数 7 (0x9A-0x9B)
    pub dig_p7: i16,
    /// 压力校准系数 8 (0x9C-0x9D)
    pub dig_p8: i16,
    /// 压力校准系数 9 (0x9E-0x9F)
    pub dig_p9: i16,

    // 湿度校准参数组
    /// 湿度校准系数 1 (0xA1)
    pub dig_h1: u8,
    /// 湿度校准系数 2 (0xE1-0xE2, 小端序)
    pub dig_h2: i16,
    /// 湿度校准系数 3 (0xE3)
    pub dig_h3: u8,
    /// 湿度校准系数 4 - 12位有符号数
    ///
    /// ## 存储格式
    /// 0xE4 是高8位(有符号)，0xE5[3:0] 是低4位
    /// ```text
    /// dig_h4 = ((e4 as i8 as i32) << 24 >> 20) | (e5 & 0x0F)
    /// ```
    pub dig_h4: i32,
    /// 湿度校准系数 5 - 12位有符号数
    ///
    /// ## 存储格式
    /// 0xE6 是高8位(有符号)，0xE5[7:4] 是低4位
    /// ```text
    /// dig_h5 = ((e6 as i8 as i32) << 24 >> 20) | ((e5 >> 4) & 0x0F)
    /// ```
    pub dig_h5: i32,
    /// 湿度校准系数 6 (0xE7, 有符号)
    pub dig_h6: i8,
}

/// 读取两个字节作为无符号16位整数（小端序）
fn get_ushort(data: &[u8], index: usize) -> u16 {
    u16::from_le_bytes([data[index], data[index + 1]])
}

/// 读取两个字节作为有符号16位整数（小端序）
fn get_short(data: &[u8], index: usize) -> i16 {
    i16::from_le_bytes([data[index], data[index + 1]])
}

/// 读取一个字节作为有符号8位整数
fn get_char(data: &[u8], index: usize) -> i8 {
    data[index] as i8
}

/// 把有符号高字节放大到12位数的高8位，保留符号
///
/// 先左移24位把符号位放到 i32 的最高位，再算术右移20位
fn scale_high_byte(byte: i8) -> i32 {
    ((byte as i32) << 24) >> 20
}

impl CalibrationSet {
    /// 从三段突发读取的数据中解析校准参数
    ///
    /// ## 参数
    /// - `tp`: 0x88 开始的24字节
    /// - `h1`: 0xA1 的1字节
    /// - `h`: 0xE1 开始的7字节
    ///
    /// 字节数不符时返回总线错误
    pub fn decode(tp: &[u8], h1: &[u8], h: &[u8]) -> Result<Self, AgentError> {
        // 检查每段数据的长度
        if tp.len() != CALIB_TP_LEN {
            return Err(AgentError::short_read(REG_CALIB_TP, CALIB_TP_LEN, tp.len()));
        }
        if h1.len() != CALIB_H1_LEN {
            return Err(AgentError::short_read(REG_CALIB_H1, CALIB_H1_LEN, h1.len()));
        }
        if h.len() != CALIB_H_LEN {
            return Err(AgentError::short_read(REG_CALIB_H, CALIB_H_LEN, h.len()));
        }

        // 温度和压力参数都是16位小端序
        let mut calib = Self {
            dig_t1: get_ushort(tp, 0),
            dig_t2: get_short(tp, 2),
            dig_t3: get_short(tp, 4),
            dig_p1: get_ushort(tp, 6),
            dig_p2: get_short(tp, 8),
            dig_p3: get_short(tp, 10),
            dig_p4: get_short(tp, 12),
            dig_p5: get_short(tp, 14),
            dig_p6: get_short(tp, 16),
            dig_p7: get_short(tp, 18),
            dig_p8: get_short(tp, 20),
            dig_p9: get_short(tp, 22),
            ..Self::default()
        };

        // 湿度参数
        calib.dig_h1 = h1[0];
        calib.dig_h2 = get_short(h, 0);
        calib.dig_h3 = h[2];
        // H4 和 H5 两个12位有符号数共用3个字节，0xE5 被一分为二
        calib.dig_h4 = scale_high_byte(get_char(h, 3)) | (h[4] & 0x0F) as i32;
        calib.dig_h5 = scale_high_byte(get_char(h, 5)) | ((h[4] >> 4) & 0x0F) as i32;
        calib.dig_h6 = get_char(h, 6);

        // OK
        Ok(calib)
    }
}

/// 从传感器读取校准数据
///
/// 分三段突发读取：0x88 开始24字节，0xA1 的1字节，0xE1 开始7字节
pub fn read_calibration<I2C: I2c>(
    i2c: &mut I2C,
    i2c_addr: u8,
) -> Result<CalibrationSet, AgentError> {
    // 读取温度/压力校准参数 (0x88-0x9F)
    let mut tp = [0u8; CALIB_TP_LEN];
    i2c.write_read(i2c_addr, &[REG_CALIB_TP], &mut tp)
        .map_err(|err| AgentError::device_io(REG_CALIB_TP, err))?;

    // 读取湿度校准参数 (0xA1, 0xE1-0xE7)
    let mut h1 = [0u8; CALIB_H1_LEN];
    i2c.write_read(i2c_addr, &[REG_CALIB_H1], &mut h1)
        .map_err(|err| AgentError::device_io(REG_CALIB_H1, err))?;
    let mut h = [0u8; CALIB_H_LEN];
    i2c.write_read(i2c_addr, &[REG_CALIB_H], &mut h)
        .map_err(|err| AgentError::device_io(REG_CALIB_H, err))?;

    CalibrationSet::decode(&tp, &h1, &h)
}
