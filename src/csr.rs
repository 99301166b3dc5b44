// Control-status register block: the machine's cross-cutting control plane.
// Grounded on original_source/csr.c (csr_write16/csr_write16_mmio/csr_read16/
// csr_raise_error/csr_cpu_is_reset) and original_source/csr.h's ACCESS_ERROR_*
// and original_source/int.h's vector/level constants.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::{CsrEffects, Device};
use crate::cpu::{CpuId, InterruptTablesHandle};
use crate::mapper::Mapper;
use crate::scsi::ScsiController;
use crate::size::Width;

pub const INT_LEVEL_MB_IF_ERR: u8 = 1;
pub const INT_LEVEL_DMA: u8 = 2;
pub const INT_LEVEL_SCSI: u8 = 3;
pub const INT_LEVEL_JOB: u8 = 4;
pub const INT_LEVEL_UART: u8 = 5;
pub const INT_LEVEL_CLOCK: u8 = 6;
pub const INT_LEVEL_PARITY_ERR: u8 = 7;

pub const INT_VECT_SCSI_SPURIOUS: u8 = 0x60;
pub const INT_VECT_SCSI_SELECTI: u8 = 0x61;
pub const INT_VECT_SCSI_RESELECT: u8 = 0x62;
pub const INT_VECT_SCSI_PARITY: u8 = 0x64;
pub const INT_VECT_SCSI_POINTER: u8 = 0x68;
pub const INT_VECT_PARITY_ERR: u8 = 0x41;
pub const INT_VECT_CLOCK: u8 = 0x83;
pub const INT_VECT_MB_IF_ERR: u8 = 0x7F;
pub const INT_VECT_DMA: u8 = 0xC2;
pub const INT_VECT_JOB: u8 = 0xC1;

// Primary-window register offsets (byte addresses, 16 registers, 32 bytes).
const REG_RESET_SELECT: u32 = 0x00;
const REG_PARITY_ERR: u32 = 0x02;
const REG_MBUS_ERR_HI: u32 = 0x04;
const REG_MBUS_ERR_LO: u32 = 0x06;
const REG_SCSI_BYTECOUNT_HI: u32 = 0x08;
const REG_SCSI_BYTECOUNT_LO: u32 = 0x0A;
const REG_SCSI_POINTER_HI: u32 = 0x0C;
const REG_SCSI_POINTER_LO: u32 = 0x0E;
const REG_SCSI_REG: u32 = 0x10;
const REG_LED: u32 = 0x12;
const REG_USART_MIRROR: u32 = 0x14;
const REG_MISC: u32 = 0x16;
const REG_KILL: u32 = 0x18;
const REG_ERROR: u32 = 0x1A;
const REG_INT_ENABLE: u32 = 0x1C;
const REG_USERID: u32 = 0x1E;

const KILL_BIT_JOB_RESET: u16 = 1 << 0;
const KILL_BIT_DMA_RESET: u16 = 1 << 1;
const KILL_BIT_RESERVED: u16 = 1 << 6;
const KILL_RETAINED_MASK: u16 = KILL_BIT_JOB_RESET | KILL_BIT_DMA_RESET | KILL_BIT_RESERVED;
const KILL_JOB_ID_BIT: u16 = 1 << 7;

const MISC_ENMAP_INV: u16 = 1 << 0; // active-low: 0 = mapper enabled
const MISC_SCSI_DIAG_LATCH: u16 = 1 << 1;
const MISC_SCSI_DIAG_PARITY: u16 = 1 << 2;
const MISC_FORCE_A23_DMA: u16 = 1 << 3;
const MISC_FORCE_A23_JOB: u16 = 1 << 4;
const MISC_MBUS_HOLD: u16 = 1 << 5;
const MISC_MBUS_DIAG: u16 = 1 << 6;
const MISC_PARITY_FORCE_HI: u16 = 1 << 7;
const MISC_PARITY_FORCE_LO: u16 = 1 << 8;

use crate::error::{ACCESS_ERROR_A, ACCESS_ERROR_U};

pub struct Csr {
    parity_err: u16,
    mbus_err_addr: u32,
    scsi_reg: u16,
    led: u16,
    usart_mirror: u16,
    misc: u16,
    kill: u16,
    error: u16,
    int_enable: u16,
    userid: u16,
    job_softint: bool,
    dma_softint: bool,
    scsi: Rc<RefCell<ScsiController>>,
    mapper: Rc<RefCell<Mapper>>,
    interrupts: InterruptTablesHandle,
    pending: CsrEffects,
}

impl Csr {
    pub fn new(scsi: Rc<RefCell<ScsiController>>, mapper: Rc<RefCell<Mapper>>, interrupts: InterruptTablesHandle) -> Self {
        Csr {
            parity_err: 0,
            mbus_err_addr: 0,
            scsi_reg: 0,
            led: 0,
            usart_mirror: 0,
            misc: MISC_ENMAP_INV, // mapper disabled at reset (active-low bit set)
            kill: KILL_BIT_JOB_RESET | KILL_BIT_DMA_RESET,
            error: 0,
            int_enable: 0,
            userid: 0,
            job_softint: false,
            dma_softint: false,
            scsi,
            mapper,
            interrupts,
            pending: CsrEffects::default(),
        }
    }

    pub fn is_cpu_reset(&self, cpu: CpuId) -> bool {
        match cpu {
            // The JOB reset bit is active-low in hardware; the predicate inverts it.
            CpuId::Job => self.kill & KILL_BIT_JOB_RESET == 0,
            CpuId::Dma => self.kill & KILL_BIT_DMA_RESET != 0,
        }
    }

    pub fn set_access_error(&mut self, _cpu: CpuId, error_type: u8, addr: u32, _is_write: bool) {
        self.error |= error_type as u16;
        self.mbus_err_addr = addr;
    }

    pub fn set_parity_error(&mut self, mask: u8) {
        self.parity_err |= mask as u16;
    }

    /// Injects a multibus-timeout interrupt when diagnostic mode is on.
    pub fn raise_mbus_error(&mut self, cpu: CpuId) {
        if self.misc & MISC_MBUS_DIAG != 0 {
            self.interrupts.borrow_mut().raise(cpu, INT_VECT_MB_IF_ERR, INT_LEVEL_MB_IF_ERR);
        }
    }

    pub fn take_effects(&mut self) -> CsrEffects {
        std::mem::take(&mut self.pending)
    }

    fn write_misc(&mut self, value: u16) {
        self.misc = value;
        self.pending.mapper_enabled = Some(value & MISC_ENMAP_INV == 0);
        self.pending.force_a23 =
            Some([value & MISC_FORCE_A23_DMA != 0, value & MISC_FORCE_A23_JOB != 0]);
        self.pending.parity_force =
            Some([value & MISC_PARITY_FORCE_HI != 0, value & MISC_PARITY_FORCE_LO != 0]);
    }

    fn write_primary(&mut self, offset: u32, value: u16) {
        match offset {
            REG_RESET_SELECT => log::debug!(target: "csr", "reset-select write {:#06x} (logging only)", value),
            REG_PARITY_ERR => self.parity_err = value,
            REG_MBUS_ERR_HI => self.mbus_err_addr = (self.mbus_err_addr & 0xffff) | ((value as u32) << 16),
            REG_MBUS_ERR_LO => self.mbus_err_addr = (self.mbus_err_addr & 0xffff0000) | value as u32,
            REG_SCSI_BYTECOUNT_HI | REG_SCSI_BYTECOUNT_LO => {
                let mut bc = self.scsi.borrow().bytecount();
                if offset == REG_SCSI_BYTECOUNT_HI {
                    bc = (bc & 0xffff) | ((value as u32) << 16);
                } else {
                    bc = (bc & 0xffff0000) | value as u32;
                }
                self.scsi.borrow_mut().set_bytecount(bc);
            }
            REG_SCSI_POINTER_HI | REG_SCSI_POINTER_LO => {
                let mut ptr = self.scsi.borrow().pointer();
                if offset == REG_SCSI_POINTER_HI {
                    ptr = (ptr & 0xffff) | ((value as u32) << 16);
                } else {
                    ptr = (ptr & 0xffff0000) | value as u32;
                }
                self.scsi.borrow_mut().set_pointer(ptr);
            }
            REG_SCSI_REG => {
                self.scsi_reg = value;
                self.pending.scsireg_write = Some(value);
            }
            REG_LED => self.led = value,
            REG_USART_MIRROR => self.usart_mirror = value,
            REG_MISC => self.write_misc(value),
            REG_KILL => self.kill = value & KILL_RETAINED_MASK,
            REG_ERROR => { /* read-only, writes ignored */ }
            REG_INT_ENABLE => self.int_enable = value,
            REG_USERID => {
                self.userid = value;
                self.mapper.borrow_mut().set_mapid((value >> 8) as u8);
            }
            _ => log::warn!(target: "csr", "write to unknown CSR offset {:#x}", offset),
        }
    }

    fn read_primary(&mut self, cpu: CpuId, offset: u32) -> u16 {
        match offset {
            REG_RESET_SELECT => 0,
            REG_PARITY_ERR => self.parity_err,
            REG_MBUS_ERR_HI => (self.mbus_err_addr >> 16) as u16,
            REG_MBUS_ERR_LO => self.mbus_err_addr as u16,
            REG_SCSI_BYTECOUNT_HI => (self.scsi.borrow().bytecount() >> 16) as u16,
            REG_SCSI_BYTECOUNT_LO => self.scsi.borrow().bytecount() as u16,
            REG_SCSI_POINTER_HI => (self.scsi.borrow().pointer() >> 16) as u16,
            REG_SCSI_POINTER_LO => self.scsi.borrow().pointer() as u16,
            REG_SCSI_REG => self.scsi.borrow().scsireg(),
            REG_LED => self.led,
            REG_USART_MIRROR => self.usart_mirror,
            REG_MISC => self.misc,
            REG_KILL => {
                let mut v = self.kill;
                if cpu == CpuId::Job {
                    v |= KILL_JOB_ID_BIT;
                }
                v
            }
            REG_ERROR => self.error,
            REG_INT_ENABLE => self.int_enable,
            REG_USERID => self.userid,
            _ => {
                log::warn!(target: "csr", "read from unknown CSR offset {:#x}", offset);
                0
            }
        }
    }

    fn write_alias(&mut self, offset: u32) {
        match offset {
            0x00 => self.error &= !(crate::error::ACCESS_ERROR_MBTO as u16),
            0x20 => self.scsi.borrow_mut().clear_diag_parity(),
            0x40 => {
                self.job_softint = false;
                self.interrupts.borrow_mut().raise(CpuId::Job, INT_VECT_JOB, 0);
            }
            0x60 => {
                self.job_softint = true;
                self.interrupts.borrow_mut().raise(CpuId::Job, INT_VECT_JOB, INT_LEVEL_JOB);
            }
            0x80 => {
                self.dma_softint = false;
                self.interrupts.borrow_mut().raise(CpuId::Dma, INT_VECT_DMA, 0);
            }
            0xA0 => {
                self.dma_softint = true;
                self.interrupts.borrow_mut().raise(CpuId::Dma, INT_VECT_DMA, INT_LEVEL_DMA);
            }
            0xC0 => log::debug!(target: "csr", "reset JOB clock int (no-op)"),
            0xE0 => log::debug!(target: "csr", "reset DMA clock int (no-op)"),
            0x100 => self.error &= !(ACCESS_ERROR_A as u16 | crate::error::ACCESS_ERROR_AJOB as u16),
            0x120 => self.error &= !(ACCESS_ERROR_A as u16),
            0x140 => self.parity_err = 0,
            0x160 => log::debug!(target: "csr", "reset switch-interrupt"),
            0x180 => self.error &= !(ACCESS_ERROR_U as u16),
            other => log::warn!(target: "csr", "write to unknown MMIO-alias offset {:#x}", other),
        }
    }
}

impl Device for Csr {
    fn read(&mut self, cpu: CpuId, offset: u32, width: Width) -> u32 {
        match width {
            Width::Word => self.read_primary(cpu, offset & !1) as u32,
            Width::Byte => {
                let word = self.read_primary(cpu, offset & !1);
                if offset & 1 != 0 {
                    (word & 0xff) as u32
                } else {
                    (word >> 8) as u32
                }
            }
            Width::Long => {
                let hi = self.read_primary(cpu, offset & !1) as u32;
                let lo = self.read_primary(cpu, (offset & !1) + 2) as u32;
                (hi << 16) | lo
            }
        }
    }

    fn write(&mut self, _cpu: CpuId, offset: u32, width: Width, value: u32) {
        match width {
            Width::Word => self.write_primary(offset & !1, value as u16),
            Width::Byte => {
                // Byte writes are modelled by upgrading to a word write on the covered half.
                let current = self.read_primary(CpuId::Job, offset & !1);
                let merged = if offset & 1 != 0 {
                    (current & 0xff00) | (value & 0xff) as u16
                } else {
                    (current & 0x00ff) | ((value as u16 & 0xff) << 8)
                };
                self.write_primary(offset & !1, merged);
            }
            Width::Long => {
                self.write_primary(offset & !1, (value >> 16) as u16);
                self.write_primary((offset & !1) + 2, value as u16);
            }
        }
    }
}

/// Wraps the same `Csr` for the MMIO-alias (reset-select) window, where the
/// access *address*, not the data, performs an action.
pub struct CsrAliasWindow(pub Rc<RefCell<Csr>>);

impl Device for CsrAliasWindow {
    fn read(&mut self, _cpu: CpuId, _offset: u32, _width: Width) -> u32 {
        0
    }
    fn write(&mut self, _cpu: CpuId, offset: u32, _width: Width, _value: u32) {
        self.0.borrow_mut().write_alias(offset);
    }
}
