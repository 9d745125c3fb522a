#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

mod address;
mod command;
mod device;
mod driver;
#[cfg(feature = "ds18b20")]
pub mod ds18b20;
mod iowire;
mod result;
mod sensor;
#[cfg(test)]
mod sim;
mod timing;

pub use address::{Address, AddressError, Addressing};
pub use command::{Command, OpCode};
pub use device::Device;
pub use driver::{BusState, Driver};
pub use iowire::IoWire;
pub use result::Error;
pub use sensor::Sensor;
pub use timing::Timing;

/// Dallas/Maxim CRC8 (x^8 + x^5 + x^4 + 1, reflected), continuing from `crc`
pub fn compute_partial_crc8(crc: u8, data: &[u8]) -> u8 {
    let mut crc = crc;
    for byte in data.iter() {
        let mut byte = *byte;
        for _ in 0..8 {
            let mix = (crc ^ byte) & 0x01;
            crc >>= 1;
            if mix != 0x00 {
                crc ^= 0x8C;
            }
            byte >>= 1;
        }
    }
    crc
}

/// True if `data` ends with the CRC8 of the bytes before it
pub fn check_crc8(data: &[u8]) -> bool {
    !data.is_empty() && compute_partial_crc8(0, data) == 0
}
