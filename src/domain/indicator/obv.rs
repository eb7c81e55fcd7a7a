//! OBV (On-Balance Volume).
//!
//! OBV[0] = volume[0]
//! If close[i] > close[i-1]: OBV[i] = OBV[i-1] + volume[i]
//! If close[i] < close[i-1]: OBV[i] = OBV[i-1] - volume[i]
//! Otherwise OBV[i] = OBV[i-1]
//!
//! No warmup period.

pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let len = close.len().min(volume.len());
    let mut values = Vec::with_capacity(len);
    let mut obv = 0.0;
    for i in 0..len {
        if i == 0 {
            obv = volume[0];
        } else if close[i] > close[i - 1] {
            obv += volume[i];
        } else if close[i] < close[i - 1] {
            obv -= volume[i];
        }
        values.push(obv);
    }
    values
}
