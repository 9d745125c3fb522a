//! Virtual-time 1-Wire bus for tests.
//!
//! Time only advances through [`SimDelay`], so every slot is replayed
//! deterministically. Devices react to the master's edges the way the
//! silicon does: they sample write slots a fixed time after the falling
//! edge, hold the line low after a falling edge to send a `0`, and answer a
//! long low pulse with a presence pulse.
//!
//! The test build also provides the `critical-section` implementation. It
//! only counts nesting depth, so the line can check that every edge and
//! sample happens inside a critical section and every millisecond sleep
//! outside of one.

use crate::compute_partial_crc8;
use core::{cell::Cell, convert::Infallible};
use critical_section::RawRestoreState;
use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin},
};
use std::{cell::RefCell, collections::VecDeque, rc::Rc, vec::Vec};

const NS_PER_US: u64 = 1_000;
const RESET_MIN_NS: u64 = 480 * NS_PER_US;
const DEVICE_SAMPLE_NS: u64 = 30 * NS_PER_US;
const DEVICE_HOLD_NS: u64 = 30 * NS_PER_US;
const PRESENCE_WAIT_NS: u64 = 20 * NS_PER_US;
const PRESENCE_LOW_NS: u64 = 120 * NS_PER_US;

thread_local! {
    static CRITICAL_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct SimCriticalSection;
critical_section::set_impl!(SimCriticalSection);

unsafe impl critical_section::Impl for SimCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        CRITICAL_DEPTH.with(|depth| depth.set(depth.get() + 1));
    }

    unsafe fn release(_token: RawRestoreState) {
        CRITICAL_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Nesting depth of critical sections entered on this thread.
pub fn critical_depth() -> u32 {
    CRITICAL_DEPTH.with(Cell::get)
}

fn assert_in_critical_section(what: &str) {
    assert!(critical_depth() > 0, "{} outside a critical section", what);
}

/// ROM codes of the two sensors of the reference deployment.
pub const ROM_A: [u8; 8] = [0x28, 0xAE, 0x76, 0x56, 0x00, 0x00, 0x00, 0x71];
pub const ROM_B: [u8; 8] = [0x28, 0x9E, 0x1C, 0x58, 0x00, 0x00, 0x00, 0x25];

/// A low pulse driven by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub start_ns: u64,
    pub low_ns: u64,
}

impl Pulse {
    pub fn low_us(&self) -> u64 {
        self.low_ns / NS_PER_US
    }
}

#[derive(Default)]
struct Line {
    now_ns: u64,
    master_low: bool,
    fall_ns: u64,
    shorted: bool,
    pulses: Vec<Pulse>,
    samples: Vec<u64>,
    devices: Vec<SimDs18b20>,
}

impl Line {
    fn is_high(&self) -> bool {
        let now = self.now_ns;
        !self.shorted && !self.master_low && self.devices.iter().all(|d| !d.pulls_low(now))
    }
}

#[derive(Clone, Default)]
pub struct SimBus(Rc<RefCell<Line>>);

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = SimDs18b20>) -> Self {
        let bus = Self::new();
        bus.0.borrow_mut().devices.extend(devices);
        bus
    }

    pub fn pin(&self) -> SimPin {
        SimPin(self.0.clone())
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay(self.0.clone())
    }

    /// Keeps the line low regardless of what the master does.
    pub fn short(&self) {
        self.0.borrow_mut().shorted = true;
    }

    pub fn now_us(&self) -> u64 {
        self.0.borrow().now_ns / NS_PER_US
    }

    pub fn pulses(&self) -> Vec<Pulse> {
        self.0.borrow().pulses.clone()
    }

    /// Offsets of the master's line samples from the preceding falling edge,
    /// in microseconds.
    pub fn sample_offsets_us(&self) -> Vec<u64> {
        self.0
            .borrow()
            .samples
            .iter()
            .map(|ns| ns / NS_PER_US)
            .collect()
    }

    pub fn clear_trace(&self) {
        let mut line = self.0.borrow_mut();
        line.pulses.clear();
        line.samples.clear();
    }

    pub fn device(&self, index: usize) -> SimDs18b20 {
        self.0.borrow().devices[index].clone()
    }

    pub fn update_device(&self, index: usize, update: impl FnOnce(&mut SimDs18b20)) {
        update(&mut self.0.borrow_mut().devices[index]);
    }
}

pub struct SimPin(Rc<RefCell<Line>>);

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut line = self.0.borrow_mut();
        if !line.master_low {
            assert_in_critical_section("falling edge");
            let now = line.now_ns;
            line.master_low = true;
            line.fall_ns = now;
            for device in line.devices.iter_mut() {
                device.on_fall(now);
            }
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut line = self.0.borrow_mut();
        if line.master_low {
            assert_in_critical_section("rising edge");
            let now = line.now_ns;
            let start_ns = line.fall_ns;
            line.master_low = false;
            line.pulses.push(Pulse {
                start_ns,
                low_ns: now - start_ns,
            });
            for device in line.devices.iter_mut() {
                device.on_rise(now, now - start_ns);
            }
        }
        Ok(())
    }
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        assert_in_critical_section("line sample");
        let mut line = self.0.borrow_mut();
        let offset = line.now_ns - line.fall_ns;
        line.samples.push(offset);
        Ok(line.is_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

pub struct SimDelay(Rc<RefCell<Line>>);

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().now_ns += u64::from(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.0.borrow_mut().now_ns += u64::from(us) * NS_PER_US;
    }

    fn delay_ms(&mut self, ms: u32) {
        assert_eq!(critical_depth(), 0, "sleep inside a critical section");
        self.0.borrow_mut().now_ns += u64::from(ms) * 1_000 * NS_PER_US;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Deselected until the next reset
    Idle,
    RomCommand,
    MatchRom { index: usize, matched: bool },
    FunctionCommand,
    WriteScratchpad { index: usize },
    Transmit,
}

/// What a transmitting device sends once its queued bits ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Ones,
    Busy { done_ns: u64 },
}

/// Behavioural model of one DS18B20.
#[derive(Debug, Clone)]
pub struct SimDs18b20 {
    pub rom: [u8; 8],
    /// Scratchpad bytes 0..8, the CRC is computed on transmission
    pub scratchpad: [u8; 8],
    pub eeprom: [u8; 3],
    /// Raw value latched by the next conversion
    pub sensed: i16,
    pub external_power: bool,
    pub conversion_us: u64,
    pub conversions: u32,
    state: State,
    rx: u8,
    rx_bits: u8,
    tx: VecDeque<bool>,
    tail: Tail,
    hold_until_ns: u64,
    presence_ns: (u64, u64),
    converting_until_ns: Option<u64>,
}

impl SimDs18b20 {
    /// Power-on state: 85 °C, TH 75, TL 70, 12 bit resolution.
    pub fn new(rom: [u8; 8]) -> Self {
        SimDs18b20 {
            rom,
            scratchpad: [0x50, 0x05, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10],
            eeprom: [0x4B, 0x46, 0x7F],
            sensed: 0x0191,
            external_power: true,
            conversion_us: 750_000,
            conversions: 0,
            state: State::Idle,
            rx: 0,
            rx_bits: 0,
            tx: VecDeque::new(),
            tail: Tail::Ones,
            hold_until_ns: 0,
            presence_ns: (0, 0),
            converting_until_ns: None,
        }
    }

    pub fn sensing(mut self, raw: i16) -> Self {
        self.sensed = raw;
        self
    }

    pub fn parasite(mut self) -> Self {
        self.external_power = false;
        self
    }

    pub fn scratchpad_with_crc(&self) -> [u8; 9] {
        let mut bytes = [0u8; 9];
        bytes[..8].copy_from_slice(&self.scratchpad);
        bytes[8] = compute_partial_crc8(0, &self.scratchpad);
        bytes
    }

    fn pulls_low(&self, now: u64) -> bool {
        now < self.hold_until_ns || (self.presence_ns.0..self.presence_ns.1).contains(&now)
    }

    fn settle(&mut self, now: u64) {
        if let Some(done) = self.converting_until_ns {
            if now >= done {
                let [lsb, msb] = self.sensed.to_le_bytes();
                self.scratchpad[0] = lsb;
                self.scratchpad[1] = msb;
                self.converting_until_ns = None;
                self.conversions += 1;
            }
        }
    }

    fn on_fall(&mut self, now: u64) {
        self.settle(now);
        if self.state != State::Transmit {
            return;
        }
        let bit = match self.tx.pop_front() {
            Some(bit) => bit,
            None => match self.tail {
                Tail::Ones => true,
                Tail::Busy { done_ns } => now >= done_ns,
            },
        };
        if !bit {
            self.hold_until_ns = now + DEVICE_HOLD_NS;
        }
    }

    fn on_rise(&mut self, now: u64, low_ns: u64) {
        self.settle(now);
        if low_ns >= RESET_MIN_NS {
            self.reset(now);
            return;
        }
        match self.state {
            State::Idle | State::Transmit => {}
            _ => self.receive(now, low_ns < DEVICE_SAMPLE_NS),
        }
    }

    fn reset(&mut self, now: u64) {
        self.state = State::RomCommand;
        self.rx = 0;
        self.rx_bits = 0;
        self.tx.clear();
        self.tail = Tail::Ones;
        self.hold_until_ns = 0;
        self.presence_ns = (now + PRESENCE_WAIT_NS, now + PRESENCE_WAIT_NS + PRESENCE_LOW_NS);
    }

    fn receive(&mut self, now: u64, bit: bool) {
        self.rx |= u8::from(bit) << self.rx_bits;
        self.rx_bits += 1;
        if self.rx_bits == 8 {
            let byte = self.rx;
            self.rx = 0;
            self.rx_bits = 0;
            self.on_byte(now, byte);
        }
    }

    fn transmit(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.tx.extend((0..8).map(|i| (byte >> i) & 0x01 == 0x01));
        }
        self.tail = Tail::Ones;
        self.state = State::Transmit;
    }

    fn on_byte(&mut self, now: u64, byte: u8) {
        self.state = match self.state {
            State::RomCommand => match byte {
                0x33 => {
                    let rom = self.rom;
                    self.transmit(&rom);
                    State::Transmit
                }
                0x55 => State::MatchRom {
                    index: 0,
                    matched: true,
                },
                0xCC => State::FunctionCommand,
                // the search walk is not modelled
                _ => State::Idle,
            },
            State::MatchRom { index, matched } => {
                let matched = matched && self.rom[index] == byte;
                match (index + 1 == self.rom.len(), matched) {
                    (false, _) => State::MatchRom {
                        index: index + 1,
                        matched,
                    },
                    (true, true) => State::FunctionCommand,
                    (true, false) => State::Idle,
                }
            }
            State::FunctionCommand => match byte {
                0x44 => {
                    let done_ns = now + self.conversion_us * NS_PER_US;
                    self.converting_until_ns = Some(done_ns);
                    self.tail = if self.external_power {
                        Tail::Busy { done_ns }
                    } else {
                        Tail::Ones
                    };
                    State::Transmit
                }
                0x4E => State::WriteScratchpad { index: 0 },
                0xBE => {
                    let bytes = self.scratchpad_with_crc();
                    self.transmit(&bytes);
                    State::Transmit
                }
                0x48 => {
                    self.eeprom.copy_from_slice(&self.scratchpad[2..5]);
                    self.tail = Tail::Ones;
                    State::Transmit
                }
                0xB8 => {
                    self.scratchpad[2..5].copy_from_slice(&self.eeprom);
                    self.tail = Tail::Ones;
                    State::Transmit
                }
                0xB4 => {
                    self.tx.push_back(self.external_power);
                    self.tail = Tail::Ones;
                    State::Transmit
                }
                _ => State::Idle,
            },
            State::WriteScratchpad { index } => {
                // only the resolution bits of the configuration are writable
                self.scratchpad[2 + index] = if index == 2 {
                    (byte & 0x60) | 0x1F
                } else {
                    byte
                };
                if index == 2 {
                    State::Idle
                } else {
                    State::WriteScratchpad { index: index + 1 }
                }
            }
            state => state,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "falling edge outside a critical section")]
    fn edge_outside_critical_section_is_rejected() {
        let bus = SimBus::new();
        let _ = bus.pin().set_low();
    }

    #[test]
    #[should_panic(expected = "sleep inside a critical section")]
    fn sleep_inside_critical_section_is_rejected() {
        let bus = SimBus::new();
        critical_section::with(|_| bus.delay().delay_ms(1));
    }

    #[test]
    fn nested_critical_sections() {
        assert_eq!(critical_depth(), 0);
        critical_section::with(|_| {
            critical_section::with(|_| assert_eq!(critical_depth(), 2));
            assert_eq!(critical_depth(), 1);
        });
        assert_eq!(critical_depth(), 0);
    }
}
