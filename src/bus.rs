// Bus fabric: address decode, width dispatch, region ACLs and parity-error
// tracking. Grounded on original_source/emu.c's `mem_range_t` table and
// `check_can_access`/`read_memory_*`/`write_memory_*`/`m68k_read/write_memory_*`
// chain, generalized from the teacher's `src/memory.rs` Bus/Device shape.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::cpu::{CpuId, InterruptTablesHandle};
use crate::csr::Csr;
use crate::error::{BusError, BusResult, MapFault, ACCESS_ERROR_A, ACCESS_ERROR_AJOB};
use crate::mapper::{Mapper, ACCESS_R, ACCESS_SYSTEM, ACCESS_W, ACCESS_X};
use crate::size::Width;

/// Canary values returned on an unmapped or missing-width access, matching
/// the original's 0xdeadbeef / 0xbeef / 0x5a constants.
fn canary(width: Width) -> u32 {
    match width {
        Width::Long => 0xdeadbeef,
        Width::Word => 0xbeef,
        Width::Byte => 0x5a,
    }
}

/// Polymorphism seam replacing the source's `void*` + function pointers: a
/// region's device is an opaque capability exposing width-and-direction
/// accessors.
pub trait Device {
    fn read(&mut self, cpu: CpuId, offset: u32, width: Width) -> u32;
    fn write(&mut self, cpu: CpuId, offset: u32, width: Width, value: u32);
}

pub type DeviceHandle = Rc<RefCell<dyn Device>>;

/// A named, possibly-disabled memory region.
pub struct MemoryRegion {
    pub name: &'static str,
    pub base: u32,
    pub size: u32,
    pub user_accessible: bool,
    pub device: DeviceHandle,
}

/// Access direction/kind requested of the bus, used both for mapper flags
/// and for region ACL enforcement.
#[derive(Debug, Clone, Copy)]
pub struct Access {
    pub write: bool,
    pub execute: bool,
    pub system: bool,
}

impl Access {
    pub fn read(system: bool, execute: bool) -> Self {
        Access { write: false, execute, system }
    }
    pub fn write(system: bool) -> Self {
        Access { write: true, execute: false, system }
    }

    fn mapper_flags(self) -> u16 {
        let mut flags = 0u16;
        if !self.write {
            flags |= ACCESS_R;
        }
        if self.write {
            flags |= ACCESS_W;
        }
        if self.execute {
            flags |= ACCESS_X;
        }
        if self.system {
            flags |= ACCESS_SYSTEM;
        }
        flags
    }
}

/// Pending side effects of a CSR write that the fabric, not CSR itself,
/// must apply (CSR has no back-reference to the bus — see DESIGN.md's note
/// on breaking the CSR/SCSI/fabric reference cycle).
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrEffects {
    pub mapper_enabled: Option<bool>,
    pub force_a23: Option<[bool; 2]>,
    pub parity_force: Option<[bool; 2]>,
    /// A raw write to the SCSI control register. Deferred here (rather than
    /// applied immediately by CSR) because driving the SCSI operational
    /// state machine needs the bus fabric for CDB/data transfers, and CSR
    /// has no back-reference to the bus (see DESIGN.md).
    pub scsireg_write: Option<u16>,
}

const PARITY_SET_CAPACITY: usize = 8;
const RAM_LIMIT: u32 = 0x800000;

pub struct Bus {
    regions: Vec<MemoryRegion>,
    ram_region: usize,
    mapram_region: usize,
    csr_region: usize,
    csr_alias_region: usize,
    mem_size: u32,
    mapper: Rc<RefCell<Mapper>>,
    csr: Rc<RefCell<Csr>>,
    interrupts: InterruptTablesHandle,
    parity_set: HashSet<u32>,
    parity_force: [bool; 2],
    force_a23: [bool; 2],
    pending_scsireg_write: Option<u16>,
}

impl Bus {
    pub fn new(
        regions: Vec<MemoryRegion>,
        ram_region: usize,
        mapram_region: usize,
        csr_region: usize,
        csr_alias_region: usize,
        mem_size: u32,
        mapper: Rc<RefCell<Mapper>>,
        csr: Rc<RefCell<Csr>>,
        interrupts: InterruptTablesHandle,
    ) -> Self {
        Bus {
            regions,
            ram_region,
            mapram_region,
            csr_region,
            csr_alias_region,
            mem_size,
            mapper,
            csr,
            interrupts,
            parity_set: HashSet::new(),
            parity_force: [false, false],
            force_a23: [false, false],
            pending_scsireg_write: None,
        }
    }

    /// Drains a deferred SCSI control-register write, if a CSR access
    /// staged one this call. The caller (the machine, which owns both the
    /// bus and the SCSI controller) is responsible for applying it.
    pub fn take_pending_scsireg_write(&mut self) -> Option<u16> {
        self.pending_scsireg_write.take()
    }

    pub fn set_force_a23(&mut self, cpu: CpuId, bits: bool) {
        self.force_a23[cpu.index()] = bits;
    }

    pub fn set_parity_force(&mut self, mask: [bool; 2]) {
        self.parity_force = mask;
    }

    /// Flips RAM ↔ MAPRAM as CSR's ENMAP bit dictates. Regions "RAM" and
    /// "MAPRAM" never both have non-zero size.
    pub fn set_mapper_enabled(&mut self, enabled: bool) {
        if enabled {
            self.regions[self.ram_region].size = 0;
            self.regions[self.mapram_region].size = self.mem_size;
        } else {
            self.regions[self.ram_region].size = self.mem_size;
            self.regions[self.mapram_region].size = 0;
        }
    }

    fn apply_csr_effects(&mut self, effects: CsrEffects) {
        if let Some(enabled) = effects.mapper_enabled {
            self.set_mapper_enabled(enabled);
        }
        if let Some(bits) = effects.force_a23 {
            self.force_a23 = bits;
        }
        if let Some(mask) = effects.parity_force {
            self.parity_force = mask;
        }
        if let Some(value) = effects.scsireg_write {
            self.pending_scsireg_write = Some(value);
        }
    }

    fn find_region(&self, addr: u32) -> Option<(usize, u32)> {
        self.regions
            .iter()
            .enumerate()
            .find(|(_, r)| r.size > 0 && addr >= r.base && addr < r.base + r.size)
            .map(|(idx, r)| (idx, addr - r.base))
    }

    fn apply_force_a23(&self, cpu: CpuId, addr: u32) -> u32 {
        if self.force_a23[cpu.index()] {
            addr | RAM_LIMIT
        } else {
            addr
        }
    }

    fn check_mapper(&mut self, cpu: CpuId, addr: u32, access: Access) -> Result<(), MapFault> {
        self.mapper.borrow().access_allowed(addr, access.mapper_flags())
    }

    fn record_fault(&mut self, cpu: CpuId, code: u8, addr: u32, is_write: bool) {
        self.csr.borrow_mut().set_access_error(cpu, code, addr, is_write);
    }

    fn track_parity_on_write(&mut self, addr: u32, width: Width) {
        let hl = if self.parity_force[(addr & 1) as usize] { Some(true) } else { None };
        for offset in 0..width.bytes() {
            let byte_addr = addr + offset;
            if byte_addr >= self.mem_size {
                continue;
            }
            if hl.is_some() {
                if self.parity_set.len() < PARITY_SET_CAPACITY {
                    self.parity_set.insert(byte_addr);
                }
            } else {
                self.parity_set.remove(&byte_addr);
            }
        }
    }

    fn check_parity_on_read(&mut self, cpu: CpuId, addr: u32, width: Width) {
        let mut mask = 0u8;
        for offset in 0..width.bytes() {
            let byte_addr = addr + offset;
            if self.parity_set.contains(&byte_addr) {
                mask |= if byte_addr & 1 == 0 { 0b01 } else { 0b10 };
            }
        }
        if mask != 0 {
            self.csr.borrow_mut().set_parity_error(mask);
            self.interrupts.borrow_mut().raise(cpu, crate::csr::INT_VECT_PARITY_ERR, crate::csr::INT_LEVEL_PARITY_ERR);
        }
    }

    pub fn read(&mut self, cpu: CpuId, addr: u32, width: Width, access: Access) -> BusResult<u32> {
        let addr = self.apply_force_a23(cpu, addr);
        if addr < RAM_LIMIT {
            if let Err(fault) = self.check_mapper(cpu, addr, access) {
                let code = fault.access_error_code();
                self.record_fault(cpu, code, addr, false);
                return Err(BusError::from_map_fault(addr, false, fault));
            }
        } else if !access.system {
            self.record_fault(cpu, ACCESS_ERROR_A, addr, false);
            return Err(BusError::new(addr, false, ACCESS_ERROR_A));
        }
        self.check_parity_on_read(cpu, addr, width);
        match self.find_region(addr) {
            Some((idx, offset)) => {
                if cpu == CpuId::Job && !access.system && !self.regions[idx].user_accessible {
                    self.record_fault(cpu, ACCESS_ERROR_AJOB, addr, false);
                    return Err(BusError::new(addr, false, ACCESS_ERROR_AJOB));
                }
                if idx == self.mapram_region {
                    self.mapper.borrow_mut().set_sysmode(access.system);
                }
                let value = self.regions[idx].device.borrow_mut().read(cpu, offset, width);
                if idx == self.csr_region || idx == self.csr_alias_region {
                    let effects = self.csr.borrow_mut().take_effects();
                    self.apply_csr_effects(effects);
                }
                Ok(value)
            }
            None => {
                log::warn!(target: "emu", "unmapped read at {:#x}", addr);
                Ok(canary(width))
            }
        }
    }

    pub fn write(&mut self, cpu: CpuId, addr: u32, width: Width, value: u32, access: Access) -> BusResult<()> {
        let addr = self.apply_force_a23(cpu, addr);
        if addr < RAM_LIMIT {
            if let Err(fault) = self.check_mapper(cpu, addr, access) {
                let code = fault.access_error_code();
                self.record_fault(cpu, code, addr, true);
                return Err(BusError::from_map_fault(addr, true, fault));
            }
            self.track_parity_on_write(addr, width);
        } else if !access.system {
            self.record_fault(cpu, ACCESS_ERROR_A, addr, true);
            return Err(BusError::new(addr, true, ACCESS_ERROR_A));
        }
        match self.find_region(addr) {
            Some((idx, offset)) => {
                if cpu == CpuId::Job && !access.system && !self.regions[idx].user_accessible {
                    self.record_fault(cpu, ACCESS_ERROR_AJOB, addr, true);
                    return Err(BusError::new(addr, true, ACCESS_ERROR_AJOB));
                }
                if idx == self.mapram_region {
                    self.mapper.borrow_mut().set_sysmode(access.system);
                }
                self.regions[idx].device.borrow_mut().write(cpu, offset, width, value);
                if idx == self.csr_region || idx == self.csr_alias_region {
                    let effects = self.csr.borrow_mut().take_effects();
                    self.apply_csr_effects(effects);
                }
                Ok(())
            }
            None => {
                log::warn!(target: "emu", "dropped write to unmapped {:#x}", addr);
                Ok(())
            }
        }
    }

    /// Byte-granular DMA access path for the SCSI block mover and multibus
    /// loopback: bypasses region ACLs but still consults the mapper in
    /// system mode, and returns `None` (the original's -1 sentinel) rather
    /// than raising a CPU exception.
    pub fn dma_read_byte(&mut self, addr: u32) -> Option<u8> {
        let access = Access::read(true, false);
        self.check_mapper(CpuId::Dma, addr, access).ok()?;
        match self.find_region(addr) {
            Some((idx, offset)) => {
                if idx == self.mapram_region {
                    self.mapper.borrow_mut().set_sysmode(access.system);
                }
                Some(self.regions[idx].device.borrow_mut().read(CpuId::Dma, offset, Width::Byte) as u8)
            }
            None => None,
        }
    }

    pub fn dma_write_byte(&mut self, addr: u32, value: u8) -> bool {
        let access = Access::write(true);
        if self.check_mapper(CpuId::Dma, addr, access).is_err() {
            return false;
        }
        match self.find_region(addr) {
            Some((idx, offset)) => {
                if idx == self.mapram_region {
                    self.mapper.borrow_mut().set_sysmode(access.system);
                }
                self.regions[idx].device.borrow_mut().write(CpuId::Dma, offset, Width::Byte, value as u32);
                true
            }
            None => false,
        }
    }

    pub fn region_names(&self) -> Vec<&'static str> {
        self.regions.iter().map(|r| r.name).collect()
    }
}
