// Multibus bridge stub: loopback and error injection only, per §4.10.
// Grounded on original_source/mbus.c's byte-swap quirk and its
// diagnostic-loopback/held gating.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::Device;
use crate::cpu::CpuId;
use crate::csr::Csr;
use crate::size::Width;

pub struct MultibusStub {
    csr: Rc<RefCell<Csr>>,
    diag_loopback: bool,
    held: bool,
    loopback: Vec<u8>,
}

impl MultibusStub {
    pub fn new(csr: Rc<RefCell<Csr>>, size: u32) -> Self {
        MultibusStub { csr, diag_loopback: false, held: false, loopback: vec![0; size as usize] }
    }

    pub fn set_diag_loopback(&mut self, on: bool) {
        self.diag_loopback = on;
    }

    pub fn set_held(&mut self, held: bool) {
        self.held = held;
    }
}

impl Device for MultibusStub {
    fn read(&mut self, cpu: CpuId, offset: u32, width: Width) -> u32 {
        if self.held {
            log::warn!(target: "mbus", "read while multibus held, dropped");
            return 0;
        }
        if !self.diag_loopback {
            self.csr.borrow_mut().raise_mbus_error(cpu);
            return 0;
        }
        // 8-bit accesses are byte-swapped to compensate for the LE/BE
        // crossing on the real bridge; 16-bit accesses pass through.
        let addr = if width == Width::Byte { offset ^ 1 } else { offset };
        crate::mapper::read_be(&self.loopback, addr as usize, width)
    }

    fn write(&mut self, cpu: CpuId, offset: u32, width: Width, value: u32) {
        if self.held {
            log::warn!(target: "mbus", "write while multibus held, dropped");
            return;
        }
        if !self.diag_loopback {
            self.csr.borrow_mut().raise_mbus_error(cpu);
            return;
        }
        let addr = if width == Width::Byte { offset ^ 1 } else { offset };
        crate::mapper::write_be(&mut self.loopback, addr as usize, width, value);
    }
}
