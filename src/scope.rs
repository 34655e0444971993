#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::float_cmp,
    clippy::module_name_repetitions
)]

use std::fmt;
use std::str::FromStr;

use crate::scpi::{parse_block, query_parse, ScpiError, ScpiResult, Transport};
use crate::trace::{Trace, TraceData};

/// Largest number of samples requested per `:WAV:DATA?` in RAW mode (scope limit for BYTE data).
pub const MAX_POINTS_PER_READ: usize = 250_000;

/// Deepest acquisition memory of the DS1000Z series (24 Mpts, single channel).
pub const MAX_MEMORY_DEPTH: usize = 24_000_000;

/// Horizontal scales the scope accepts, in s/div, largest first.
const TIMEBASE_STEPS: [f64; 31] = [
    50.0, 20.0, 10.0, 5.0, 2.0, 1.0, 0.5, 0.2, 0.1, 5.0e-2, 2.0e-2, 1.0e-2, 5.0e-3, 2.0e-3, 1.0e-3,
    5.0e-4, 2.0e-4, 1.0e-4, 5.0e-5, 2.0e-5, 1.0e-5, 5.0e-6, 2.0e-6, 1.0e-6, 5.0e-7, 2.0e-7, 1.0e-7,
    5.0e-8, 2.0e-8, 1.0e-8, 5.0e-9,
];

const MIN_SCALE_V: f64 = 1.0e-3;
const MAX_SCALE_V: f64 = 10.0;

macro_rules! scpi_enum {
    ($name:ident { $($variant:ident => $scpi:literal $(| $alias:literal)*),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            #[must_use]
            pub fn as_scpi(self) -> &'static str {
                match self {
                    $($name::$variant => $scpi),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_scpi())
            }
        }

        impl FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($scpi $(| $alias)* => Ok($name::$variant),)+
                    _ => Err(format!("unknown {} {:?}", stringify!($name), s)),
                }
            }
        }
    };
}

scpi_enum!(Coupling {
    Dc => "DC",
    Ac => "AC",
    Gnd => "GND",
});

scpi_enum!(Slope {
    Positive => "POS" | "POSITIVE" | "RISING",
    Negative => "NEG" | "NEGATIVE" | "FALLING",
    Either => "RFAL" | "EITHER",
});

scpi_enum!(TriggerMode {
    Edge => "EDGE",
    Pulse => "PULS" | "PULSE",
    Slope => "SLOP" | "SLOPE",
});

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSetup {
    pub channel: u8,
    pub scale_v: f64,
    pub offset_v: f64,
    pub timebase_s: f64,
    pub time_offset_s: f64,
    pub coupling: Coupling,
}

impl Default for ChannelSetup {
    fn default() -> Self {
        ChannelSetup {
            channel: 1,
            scale_v: 0.1,
            offset_v: 0.0,
            timebase_s: 5.0e-3,
            time_offset_s: 0.0,
            coupling: Coupling::Dc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSetup {
    pub source_channel: u8,
    pub level_v: f64,
    pub mode: TriggerMode,
    pub slope: Slope,
    pub coupling: Coupling,
}

impl Default for TriggerSetup {
    fn default() -> Self {
        TriggerSetup {
            source_channel: 4,
            level_v: 1.0,
            mode: TriggerMode::Edge,
            slope: Slope::Positive,
            coupling: Coupling::Dc,
        }
    }
}

/// Round a requested horizontal scale down onto the scope's 1-2-5 sequence.
#[must_use]
pub fn discretise_timebase(timebase_s: f64) -> f64 {
    TIMEBASE_STEPS
        .iter()
        .copied()
        .find(|&step| timebase_s >= step)
        .unwrap_or(TIMEBASE_STEPS[TIMEBASE_STEPS.len() - 1])
}

#[must_use]
pub fn clamp_scale(scale_v: f64) -> f64 {
    scale_v.clamp(MIN_SCALE_V, MAX_SCALE_V)
}

/// Session with a Rigol-style oscilloscope.
#[derive(Debug)]
pub struct Scope<T: Transport> {
    inst: T,
    pub max_points_per_read: usize,
}

impl<T: Transport> Scope<T> {
    #[must_use]
    pub fn open(inst: T) -> Self {
        Scope {
            inst,
            max_points_per_read: MAX_POINTS_PER_READ,
        }
    }

    #[must_use]
    pub fn close(self) -> T {
        self.inst
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.inst
    }

    /// # Errors
    /// Propagates transport errors.
    pub fn identify(&mut self) -> ScpiResult<String> {
        Ok(self.inst.query("*IDN?")?.trim().to_owned())
    }

    /// Vertical and horizontal settings for one channel. The timebase is rounded down onto the
    /// scope's sequence and the vertical scale clamped to 1 mV..10 V per division.
    /// # Errors
    /// Propagates transport errors.
    pub fn configure_channel(&mut self, setup: &ChannelSetup) -> ScpiResult<()> {
        let tb = discretise_timebase(setup.timebase_s);
        let scale = clamp_scale(setup.scale_v);
        let ch = setup.channel;

        self.inst.write(&format!(":TIM:MAIN:SCAL {tb:.1e}"))?;
        self.inst
            .write(&format!(":TIM:MAIN:OFFS {}", setup.time_offset_s))?;
        self.inst.write(&format!(":CHAN{ch}:SCAL {scale}"))?;
        self.inst
            .write(&format!(":CHAN{ch}:COUP {}", setup.coupling))?;
        self.inst
            .write(&format!(":CHAN{ch}:OFFS {}", setup.offset_v))?;
        Ok(())
    }

    /// # Errors
    /// Propagates transport errors.
    pub fn configure_trigger(&mut self, setup: &TriggerSetup) -> ScpiResult<()> {
        self.inst.write(&format!(":TRIG:MODE {}", setup.mode))?;
        self.inst.write(&format!(":TRIG:COUP {}", setup.coupling))?;
        self.inst
            .write(&format!(":TRIG:EDG:SOUR CHAN{}", setup.source_channel))?;
        self.inst
            .write(&format!(":TRIG:EDG:SLOPE {}", setup.slope))?;
        self.inst
            .write(&format!(":TRIG:EDG:LEV {}", setup.level_v))?;
        Ok(())
    }

    /// Download the full acquisition memory of channel `ch` as volts.
    ///
    /// Data is read as raw bytes in chunks of at most `max_points_per_read` samples and scaled
    /// with the scope's preamble: `volts = (raw - yref - yorigin) * yincrement`.
    /// # Errors
    /// Propagates transport errors; `ScpiError::Block` if a chunk comes back with the wrong
    /// length.
    pub fn get_waveform(&mut self, ch: u8) -> ScpiResult<Trace> {
        self.inst.write(&format!(":WAV:SOUR CHAN{ch}"))?;
        self.inst.write(":WAV:MODE RAW")?;
        self.inst.write(":WAV:FORM BYTE")?;

        let mdepth = self.memory_depth()?;
        let x_increment: f64 = query_parse(&mut self.inst, ":WAV:XINC?")?;
        let x_origin: f64 = query_parse(&mut self.inst, ":WAV:XOR?")?;
        let y_increment: f64 = query_parse(&mut self.inst, ":WAV:YINC?")?;
        let y_origin: f64 = query_parse(&mut self.inst, ":WAV:YOR?")?;
        let y_reference: f64 = query_parse(&mut self.inst, ":WAV:YREF?")?;

        let chunk = self.max_points_per_read.max(1);
        let mut raw = Vec::with_capacity(mdepth);
        let mut i0 = 0;
        while i0 < mdepth {
            let i1 = (i0 + chunk).min(mdepth);
            self.inst.write(&format!(":WAV:STAR {}", i0 + 1))?;
            self.inst.write(&format!(":WAV:STOP {i1}"))?;
            self.inst.write(":WAV:DATA?")?;
            let block = self.inst.read_raw()?;
            let payload = parse_block(&block)?;
            if payload.len() != i1 - i0 {
                return Err(ScpiError::Block(format!(
                    "asked for samples {}..={i1}, got {} bytes",
                    i0 + 1,
                    payload.len()
                )));
            }
            raw.extend_from_slice(payload);
            i0 = i1;
        }

        let volts = raw
            .iter()
            .map(|&b| (f64::from(b) - y_reference - y_origin) * y_increment)
            .collect();
        Ok(Trace::new(x_origin, x_increment, volts))
    }

    /// `:ACQ:MDEP?` as a sample count. The scope answers in scientific notation, and `9.9E37`
    /// when the depth is not available.
    /// # Errors
    /// `ScpiError::Parse` unless the answer is a whole number in `1..=MAX_MEMORY_DEPTH`.
    pub fn memory_depth(&mut self) -> ScpiResult<usize> {
        const CMD: &str = ":ACQ:MDEP?";
        let response = self.inst.query(CMD)?;
        let depth = response.trim().parse::<f64>().ok().filter(|d| {
            d.is_finite() && *d >= 1.0 && *d <= MAX_MEMORY_DEPTH as f64 && d.fract() == 0.0
        });
        match depth {
            Some(d) => Ok(d as usize),
            None => Err(ScpiError::Parse {
                command: CMD.to_owned(),
                response,
            }),
        }
    }

    /// Transmission and reflection channels, downloaded one after the other.
    /// # Errors
    /// Propagates transport errors.
    pub fn get_trace_data(&mut self, transmission_ch: u8, reflection_ch: u8) -> ScpiResult<TraceData> {
        let transmission = self.get_waveform(transmission_ch)?;
        let reflection = self.get_waveform(reflection_ch)?;
        Ok(TraceData::new(transmission, reflection))
    }
}
