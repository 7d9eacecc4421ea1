use super::calibration::CalibrationSet;
use crate::measurement::Measurement;

/// 一次突发读取得到的原始ADC数据
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// 20位压力ADC值 (0xF7-0xF9)
    pub pressure: u32,
    /// 20位温度ADC值 (0xFA-0xFC)
    pub temperature: u32,
    /// 16位湿度ADC值 (0xFD-0xFE)
    pub humidity: u16,
}

impl RawSample {
    /// 解析从 0xF7 开始突发读取的8字节
    pub fn from_bytes(data: &[u8; 8]) -> Self {
        // 解析20位压力数据 (0xF7-0xF9)
        let pressure = ((data[0] as u32) << 12) | ((data[1] as u32) << 4) | ((data[2] as u32) >> 4);
        // 解析20位温度数据 (0xFA-0xFC)
        let temperature =
            ((data[3] as u32) << 12) | ((data[4] as u32) << 4) | ((data[5] as u32) >> 4);
        // 解析16位湿度数据 (0xFD-0xFE)
        let humidity = ((data[6] as u16) << 8) | data[7] as u16;

        Self {
            pressure,
            temperature,
            humidity,
        }
    }
}

/// BME280温度补偿
///
/// 整数定点运算，返回 (温度【0.01°C】, t_fine)。
///
/// 运算使用 i64，有符号右移是算术右移（向负无穷取整），
/// 与参考算法的结果逐位一致，任意20位原始值都不会溢出。
pub fn compensate_temperature(adc_t: u32, calib: &CalibrationSet) -> (i64, i64) {
    let adc_t = adc_t as i64;
    let dig_t1 = calib.dig_t1 as i64;
    let dig_t2 = calib.dig_t2 as i64;
    let dig_t3 = calib.dig_t3 as i64;

    let var1 = (((adc_t >> 3) - (dig_t1 << 1)) * dig_t2) >> 11;
    let var2 = (((((adc_t >> 4) - dig_t1) * ((adc_t >> 4) - dig_t1)) >> 12) * dig_t3) >> 14;

    // 压力和湿度补偿依赖这个中间值，而不是最终温度
    let t_fine = var1 + var2;
    let temperature = (t_fine * 5 + 128) >> 8;

    (temperature, t_fine)
}

/// BME280压力补偿（双精度浮点版本）
///
/// ## 返回
/// - 补偿后的压力值(Pa)
/// - 分母为0时（未校准或参数退化）返回0
pub fn compensate_pressure(adc_p: u32, t_fine: i64, calib: &CalibrationSet) -> f64 {
    let dig_p1 = calib.dig_p1 as f64;
    let dig_p2 = calib.dig_p2 as f64;
    let dig_p3 = calib.dig_p3 as f64;
    let dig_p4 = calib.dig_p4 as f64;
    let dig_p5 = calib.dig_p5 as f64;
    let dig_p6 = calib.dig_p6 as f64;
    let dig_p7 = calib.dig_p7 as f64;
    let dig_p8 = calib.dig_p8 as f64;
    let dig_p9 = calib.dig_p9 as f64;

    // 步骤1: 二阶温度补偿项
    let mut var1 = t_fine as f64 / 2.0 - 64000.0;
    let mut var2 = var1 * var1 * dig_p6 / 32768.0;
    var2 += var1 * dig_p5 * 2.0;
    var2 = var2 / 4.0 + dig_p4 * 65536.0;

    // 步骤2: 灵敏度
    var1 = (dig_p3 * var1 * var1 / 524288.0 + dig_p2 * var1) / 524288.0;
    var1 = (1.0 + var1 / 32768.0) * dig_p1;

    // 步骤3: 避免除零
    if var1 == 0.0 {
        return 0.0;
    }

    // 步骤4: 初步压力值
    let mut p = 1048576.0 - adc_p as f64;
    p = ((p - var2 / 4096.0) * 6250.0) / var1;

    // 步骤5: 最终补偿
    var1 = dig_p9 * p * p / 2147483648.0;
    var2 = p * dig_p8 / 32768.0;
    p + (var1 + var2 + dig_p7) / 16.0
}

/// BME280湿度补偿（双精度浮点版本）
///
/// 返回相对湿度(%RH)，超出 0.0-100.0 的结果会被截断到边界，
/// 这是传感器在饱和附近的噪声，不是故障。
pub fn compensate_humidity(adc_h: u16, t_fine: i64, calib: &CalibrationSet) -> f64 {
    let dig_h1 = calib.dig_h1 as f64;
    let dig_h2 = calib.dig_h2 as f64;
    let dig_h3 = calib.dig_h3 as f64;
    let dig_h4 = calib.dig_h4 as f64;
    let dig_h5 = calib.dig_h5 as f64;
    let dig_h6 = calib.dig_h6 as f64;

    let mut humidity = t_fine as f64 - 76800.0;
    humidity = (adc_h as f64 - (dig_h4 * 64.0 + dig_h5 / 16384.0 * humidity))
        * (dig_h2 / 65536.0
            * (1.0 + dig_h6 / 67108864.0 * humidity * (1.0 + dig_h3 / 67108864.0 * humidity)));
    humidity *= 1.0 - dig_h1 * humidity / 524288.0;

    humidity.clamp(0.0, 100.0)
}

/// 把原始ADC数据换算为物理量
///
/// 纯函数，没有I/O。温度必须最先计算，压力和湿度都依赖它的 t_fine。
pub fn compensate(raw: &RawSample, calib: &CalibrationSet) -> Measurement {
    let (temperature, t_fine) = compensate_temperature(raw.temperature, calib);
    let pressure = compensate_pressure(raw.pressure, t_fine, calib);
    let humidity = compensate_humidity(raw.humidity, t_fine, calib);

    Measurement {
        temperature: temperature as f64 / 100.0,
        pressure: pressure / 100.0,
        humidity,
    }
}
