//! RF power conversions into a 50 Ω load.

pub const LOAD_OHMS: f64 = 50.0;

#[inline]
#[must_use]
pub fn watt_to_dbm(watt: f64) -> f64 {
    10.0 * (watt * 1.0e3).log10()
}

#[inline]
#[must_use]
pub fn dbm_to_watt(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0) / 1000.0
}

#[inline]
#[must_use]
pub fn vrms_to_watt(vrms: f64) -> f64 {
    vrms * vrms / LOAD_OHMS
}

#[inline]
#[must_use]
pub fn watt_to_vrms(watt: f64) -> f64 {
    (watt * LOAD_OHMS).sqrt()
}

#[inline]
#[must_use]
pub fn vpp_to_vrms(vpp: f64) -> f64 {
    (vpp / 2.0) / std::f64::consts::SQRT_2
}

#[inline]
#[must_use]
pub fn vrms_to_vpp(vrms: f64) -> f64 {
    vrms * std::f64::consts::SQRT_2 * 2.0
}

#[must_use]
pub fn vpp_to_dbm(vpp: f64) -> f64 {
    watt_to_dbm(vrms_to_watt(vpp_to_vrms(vpp)))
}

#[must_use]
pub fn dbm_to_vpp(dbm: f64) -> f64 {
    vrms_to_vpp(watt_to_vrms(dbm_to_watt(dbm)))
}
