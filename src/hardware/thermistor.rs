// src/hardware/thermistor.rs - ADC to Celsius conversion for the fuser thermistor

/// (adc, celsius) calibration points for a 100k NTC (beta 4066) on a 1k8
/// divider, 10-bit ADC. Must stay sorted by adc.
const TABLE: [(u16, i16); 20] = [
    (1, -1),
    (54, 78),
    (107, 101),
    (160, 118),
    (213, 132),
    (266, 144),
    (319, 155),
    (372, 165),
    (425, 176),
    (478, 187),
    (531, 198),
    (584, 209),
    (637, 222),
    (690, 236),
    (743, 253),
    (796, 272),
    (849, 298),
    (902, 334),
    (955, 397),
    (1008, 631),
];

/// Convert a raw ADC reading into whole degrees Celsius.
///
/// Returns `None` when the reading falls outside the calibrated range, which
/// in practice means a shorted or open sensor.
pub fn adc_to_celsius(adc: u16) -> Option<i16> {
    TABLE.windows(2).find_map(|pair| {
        let (a0, c0) = pair[0];
        let (a1, c1) = pair[1];
        if a0 <= adc && adc < a1 {
            let span = i32::from(a1 - a0);
            let offset = i32::from(adc - a0);
            let celsius = i32::from(c0) + offset * (i32::from(c1) - i32::from(c0)) / span;
            Some(celsius as i16)
        } else {
            None
        }
    })
}

/// Inverse lookup, used by the simulated heater plant.
pub fn celsius_to_adc(celsius: i16) -> u16 {
    let (first_adc, first_c) = TABLE[0];
    if celsius <= first_c {
        return first_adc;
    }
    for pair in TABLE.windows(2) {
        let (a0, c0) = pair[0];
        let (a1, c1) = pair[1];
        if c0 <= celsius && celsius < c1 {
            let span = i32::from(c1) - i32::from(c0);
            let offset = i32::from(celsius) - i32::from(c0);
            return (i32::from(a0) + offset * i32::from(a1 - a0) / span) as u16;
        }
    }
    TABLE[TABLE.len() - 1].0 - 1
}
