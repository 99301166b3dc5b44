// MC146818-compatible real-time clock. Grounded on original_source/rtc.c's
// register table and its BCD encode/decode helpers.

use std::fs;
use std::path::PathBuf;

use crate::bus::Device;
use crate::cpu::CpuId;
use crate::error::EmulatorError;
use crate::size::Width;

const REG_SECONDS: u32 = 0x00;
const REG_SECONDS_ALARM: u32 = 0x02;
const REG_MINUTES: u32 = 0x04;
const REG_MINUTES_ALARM: u32 = 0x06;
const REG_HOURS: u32 = 0x08;
const REG_HOURS_ALARM: u32 = 0x0A;
const REG_DAY_OF_WEEK: u32 = 0x0C;
const REG_DATE_OF_MONTH: u32 = 0x0E;
const REG_MONTH: u32 = 0x10;
const REG_YEAR: u32 = 0x12;
const REG_A: u32 = 0x14;
const REG_B: u32 = 0x16;
const REG_C: u32 = 0x18;
const REG_D: u32 = 0x1A;
const RAM_BASE: u32 = 0x1C;
const RAM_SIZE: usize = 100;

const REG_B_BCD: u8 = 1 << 2; // set = binary mode, clear = BCD mode (DM bit)
const REG_C_UPDATE_DONE: u8 = 1 << 7;

fn to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

fn from_bcd(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0f)
}

struct ClockTime {
    seconds: u8,
    minutes: u8,
    hours: u8,
    day_of_week: u8,
    date_of_month: u8,
    month: u8,
    year: u8,
}

pub struct Rtc {
    time: ClockTime,
    reg_a: u8,
    reg_b: u8,
    reg_c: u8,
    reg_d: u8,
    ram: Vec<u8>,
    ram_path: Option<PathBuf>,
    leftover_us: u32,
}

impl Rtc {
    pub fn new(ram_path: Option<PathBuf>) -> Result<Self, EmulatorError> {
        let ram = match &ram_path {
            Some(path) if path.exists() => {
                let bytes = fs::read(path).map_err(|source| EmulatorError::RtcRamFile { path: path.clone(), source })?;
                let mut v = bytes;
                v.resize(RAM_SIZE, 0);
                v
            }
            _ => vec![0; RAM_SIZE],
        };
        Ok(Rtc {
            time: ClockTime { seconds: 0, minutes: 0, hours: 0, day_of_week: 1, date_of_month: 1, month: 1, year: 0 },
            reg_a: 0,
            reg_b: REG_B_BCD,
            reg_c: 0,
            reg_d: 0,
            ram,
            ram_path,
            leftover_us: 0,
        })
    }

    fn binary_mode(&self) -> bool {
        self.reg_b & REG_B_BCD != 0
    }

    fn persist(&self) {
        if let Some(path) = &self.ram_path {
            let _ = fs::write(path, &self.ram);
        }
    }

    fn days_in_month(month: u8, year: u8) -> u8 {
        match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 => {
                let full_year = 2000 + year as u32;
                if (full_year % 4 == 0 && full_year % 100 != 0) || full_year % 400 == 0 {
                    29
                } else {
                    28
                }
            }
            _ => 30,
        }
    }

    /// Advances the clock by `us` microseconds, carrying leftover
    /// sub-second time across calls.
    pub fn tick(&mut self, us: u32) {
        self.leftover_us += us;
        let mut seconds_elapsed = self.leftover_us / 1_000_000;
        self.leftover_us %= 1_000_000;
        while seconds_elapsed > 0 {
            self.advance_one_second();
            seconds_elapsed -= 1;
        }
    }

    fn advance_one_second(&mut self) {
        self.reg_c |= REG_C_UPDATE_DONE;
        self.time.seconds += 1;
        if self.time.seconds < 60 {
            return;
        }
        self.time.seconds = 0;
        self.time.minutes += 1;
        if self.time.minutes < 60 {
            return;
        }
        self.time.minutes = 0;
        self.time.hours += 1;
        if self.time.hours < 24 {
            return;
        }
        self.time.hours = 0;
        self.time.day_of_week = self.time.day_of_week % 7 + 1;
        self.time.date_of_month += 1;
        if self.time.date_of_month <= Self::days_in_month(self.time.month, self.time.year) {
            return;
        }
        self.time.date_of_month = 1;
        self.time.month += 1;
        if self.time.month <= 12 {
            return;
        }
        self.time.month = 1;
        self.time.year = self.time.year.wrapping_add(1);
    }

    fn encode(&self, binary: u8) -> u16 {
        if self.binary_mode() {
            binary as u16
        } else {
            to_bcd(binary) as u16
        }
    }

    fn decode(&self, raw: u16) -> u8 {
        if self.binary_mode() {
            raw as u8
        } else {
            from_bcd(raw as u8)
        }
    }
}

impl Device for Rtc {
    fn read(&mut self, _cpu: CpuId, offset: u32, _width: Width) -> u32 {
        if offset >= RAM_BASE {
            let idx = (offset - RAM_BASE) as usize;
            return *self.ram.get(idx).unwrap_or(&0) as u32;
        }
        match offset {
            REG_SECONDS => self.encode(self.time.seconds) as u32,
            REG_SECONDS_ALARM => 0,
            REG_MINUTES => self.encode(self.time.minutes) as u32,
            REG_MINUTES_ALARM => 0,
            REG_HOURS => self.encode(self.time.hours) as u32,
            REG_HOURS_ALARM => 0,
            REG_DAY_OF_WEEK => self.encode(self.time.day_of_week) as u32,
            REG_DATE_OF_MONTH => self.encode(self.time.date_of_month) as u32,
            REG_MONTH => self.encode(self.time.month) as u32,
            REG_YEAR => self.encode(self.time.year) as u32,
            REG_A => self.reg_a as u32,
            REG_B => self.reg_b as u32,
            REG_C => {
                let v = self.reg_c;
                self.reg_c &= !REG_C_UPDATE_DONE;
                v as u32
            }
            REG_D => self.reg_d as u32,
            _ => 0,
        }
    }

    fn write(&mut self, _cpu: CpuId, offset: u32, _width: Width, value: u32) {
        if offset >= RAM_BASE {
            let idx = (offset - RAM_BASE) as usize;
            if let Some(slot) = self.ram.get_mut(idx) {
                *slot = value as u8;
            }
            self.persist();
            return;
        }
        match offset {
            REG_SECONDS => self.time.seconds = self.decode(value as u16),
            REG_MINUTES => self.time.minutes = self.decode(value as u16),
            REG_HOURS => self.time.hours = self.decode(value as u16),
            REG_DAY_OF_WEEK => self.time.day_of_week = self.decode(value as u16),
            REG_DATE_OF_MONTH => self.time.date_of_month = self.decode(value as u16),
            REG_MONTH => self.time.month = self.decode(value as u16),
            REG_YEAR => self.time.year = self.decode(value as u16),
            REG_A => self.reg_a = value as u8,
            REG_B => self.reg_b = value as u8,
            REG_C | REG_D => {} // read-only status registers
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollover_across_month_end_non_leap_february() {
        let mut rtc = Rtc::new(None).unwrap();
        rtc.time = ClockTime { seconds: 59, minutes: 59, hours: 23, day_of_week: 3, date_of_month: 28, month: 2, year: 23 };
        rtc.tick(2_000_000);
        assert_eq!(rtc.time.hours, 0);
        assert_eq!(rtc.time.minutes, 0);
        assert_eq!(rtc.time.seconds, 1);
        assert_eq!(rtc.time.date_of_month, 1);
        assert_eq!(rtc.time.month, 3);
        assert_eq!(rtc.time.year, 23);
    }

    #[test]
    fn update_done_flag_sets_on_tick_and_clears_on_read() {
        let mut rtc = Rtc::new(None).unwrap();
        rtc.tick(1_000_000);
        assert_ne!(rtc.reg_c & REG_C_UPDATE_DONE, 0);
        rtc.read(CpuId::Job, REG_C, Width::Byte);
        assert_eq!(rtc.reg_c & REG_C_UPDATE_DONE, 0);
    }

    #[test]
    fn bcd_mode_round_trips_through_binary() {
        let mut rtc = Rtc::new(None).unwrap();
        rtc.reg_b &= !REG_B_BCD; // enable BCD mode
        rtc.write(CpuId::Job, REG_SECONDS, Width::Byte, 0x37); // BCD for 37
        assert_eq!(rtc.time.seconds, 37);
        assert_eq!(rtc.read(CpuId::Job, REG_SECONDS, Width::Byte), 0x37);
    }
}
