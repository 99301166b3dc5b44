// RAM, MAPRAM, ROM and SRAM devices. Grounded on original_source/emu.c's
// `mem_range_t` entries for RAM/ROM/SRAM and `mapper.c`'s windowed access
// for the mapper-enabled alias.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::Device;
use crate::cpu::CpuId;
use crate::mapper::{read_be, write_be, Mapper};
use crate::size::Width;

/// Flat, untranslated RAM backing — active while the mapper is disabled.
pub struct Ram {
    physram: Rc<RefCell<Vec<u8>>>,
}

impl Ram {
    pub fn new(physram: Rc<RefCell<Vec<u8>>>) -> Self {
        Ram { physram }
    }
}

impl Device for Ram {
    fn read(&mut self, _cpu: CpuId, offset: u32, width: Width) -> u32 {
        read_be(&self.physram.borrow(), offset as usize, width)
    }

    fn write(&mut self, _cpu: CpuId, offset: u32, width: Width, value: u32) {
        write_be(&mut self.physram.borrow_mut(), offset as usize, width, value);
    }
}

/// Paged RAM access — active while the mapper is enabled. Delegates
/// translation, permission bookkeeping and referenced/altered bits to the
/// mapper itself.
pub struct MapRam {
    mapper: Rc<RefCell<Mapper>>,
}

impl MapRam {
    pub fn new(mapper: Rc<RefCell<Mapper>>) -> Self {
        MapRam { mapper }
    }
}

impl Device for MapRam {
    fn read(&mut self, _cpu: CpuId, offset: u32, width: Width) -> u32 {
        self.mapper.borrow_mut().ram_read(offset, width)
    }

    fn write(&mut self, _cpu: CpuId, offset: u32, width: Width, value: u32) {
        self.mapper.borrow_mut().ram_write(offset, width, value);
    }
}

/// Read-only ROM image. Images shorter than the region are zero-padded.
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    pub fn new(mut data: Vec<u8>, size: u32) -> Self {
        data.resize(size as usize, 0);
        Rom { data }
    }
}

impl Device for Rom {
    fn read(&mut self, _cpu: CpuId, offset: u32, width: Width) -> u32 {
        read_be(&self.data, offset as usize, width)
    }

    fn write(&mut self, _cpu: CpuId, offset: u32, _width: Width, _value: u32) {
        log::warn!(target: "ramrom", "write to read-only ROM at offset {:#x} ignored", offset);
    }
}

/// 16 KiB of battery-less static RAM, wired up exactly like the main RAM
/// region: plain byte-addressable storage, no word-aliasing quirk.
pub struct Sram {
    data: Vec<u8>,
}

impl Sram {
    pub fn new(size: u32) -> Self {
        Sram { data: vec![0; size as usize] }
    }
}

impl Device for Sram {
    fn read(&mut self, _cpu: CpuId, offset: u32, width: Width) -> u32 {
        read_be(&self.data, offset as usize, width)
    }

    fn write(&mut self, _cpu: CpuId, offset: u32, width: Width, value: u32) {
        write_be(&mut self.data, offset as usize, width, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sram_byte_write_touches_only_that_byte() {
        let mut s = Sram::new(16);
        s.write(CpuId::Job, 4, Width::Byte, 0x7A);
        assert_eq!(s.data[4], 0x7A);
        assert_eq!(s.data[5], 0x00);
    }

    #[test]
    fn rom_pads_short_image_with_zero() {
        let mut rom = Rom::new(vec![1, 2, 3], 8);
        assert_eq!(rom.read(CpuId::Job, 0, Width::Word), 0x0102);
        assert_eq!(rom.read(CpuId::Job, 6, Width::Word), 0);
    }
}
