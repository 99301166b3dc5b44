// Top-level emulated machine: owns every subsystem, wires the bus region
// table, and runs the cooperative two-CPU scheduler. Grounded on
// original_source/emu.c's `mem_ranges[]` table construction and its
// `emu_run`/`emu_step` main loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use crate::bus::{Bus, Device, MemoryRegion};
use crate::config::Configuration;
use crate::cpu::{CpuCore, CpuId, InterruptTables, InterruptTablesHandle};
use crate::csr::{Csr, CsrAliasWindow};
use crate::devices::{MapRam, MultibusStub, Ram, Rom, Rtc, Sram, Uart};
use crate::error::EmulatorError;
use crate::mapper::Mapper;
use crate::scsi::{ScsiBufferPort, ScsiController};
use crate::scsi_hd::{CowStore, ScsiHardDisk};

/// 10 MHz bus clock, 10 µs quantum: matches the original's slice length.
const QUANTUM_CYCLES: u32 = 100;
const QUANTUM_US: u32 = 10;
const PACE_INTERVAL_MS: u64 = 10;

fn region(name: &'static str, base: u32, size: u32, user_accessible: bool, device: Rc<RefCell<dyn Device>>) -> MemoryRegion {
    MemoryRegion { name, base, size, user_accessible, device }
}

pub struct Machine {
    bus: Bus,
    mapper: Rc<RefCell<Mapper>>,
    csr: Rc<RefCell<Csr>>,
    scsi: Rc<RefCell<ScsiController>>,
    interrupts: InterruptTablesHandle,
    uart: Rc<RefCell<Uart>>,
    rtc: Rc<RefCell<Rtc>>,
    dma_cpu: Option<Box<dyn CpuCore>>,
    job_cpu: Option<Box<dyn CpuCore>>,
    leftover_cycles: [u32; 2],
    realtime: bool,
    emulated_us: u64,
    last_pace: Option<Instant>,
    syscall_trace: bool,
}

impl Machine {
    pub fn new(config: &Configuration) -> Result<Self, EmulatorError> {
        let mem_size = config.mem_size;
        let physram = Rc::new(RefCell::new(vec![0u8; mem_size as usize]));
        let interrupts = InterruptTables::handle();

        let mapper = Rc::new(RefCell::new(Mapper::new(physram.clone(), !config.strict_mapper)));
        let scsi = Rc::new(RefCell::new(ScsiController::new(interrupts.clone())));
        let csr = Rc::new(RefCell::new(Csr::new(scsi.clone(), mapper.clone(), interrupts.clone())));

        let cow = match &config.cow_dir {
            Some(dir) => Some(CowStore::open(dir.clone())?),
            None => None,
        };
        let hd = ScsiHardDisk::open(config.hd_path.clone(), cow)?;
        scsi.borrow_mut().add_target(0, Rc::new(RefCell::new(hd)));

        let rom_u17 = std::fs::read(&config.u17_path).map_err(|source| EmulatorError::RomImage { path: config.u17_path.clone(), source })?;
        let rom_u15 = std::fs::read(&config.u15_path).map_err(|source| EmulatorError::RomImage { path: config.u15_path.clone(), source })?;

        let uart = Rc::new(RefCell::new(Uart::new(interrupts.clone())));
        let rtc = Rc::new(RefCell::new(Rtc::new(config.rtc_ram_path.clone())?));
        let mbus_io: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(MultibusStub::new(csr.clone(), 512 * 1024)));
        let mbus_mem: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(MultibusStub::new(csr.clone(), 512 * 1024)));

        let ram: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Ram::new(physram.clone())));
        let mapram: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(MapRam::new(mapper.clone())));
        let rom17: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Rom::new(rom_u17, 32 * 1024)));
        let rom15: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Rom::new(rom_u15, 32 * 1024)));
        let sram: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Sram::new(16 * 1024)));
        let uart_dev: Rc<RefCell<dyn Device>> = uart.clone();
        let scsi_buf: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(ScsiBufferPort(scsi.clone())));
        let rtc_dev: Rc<RefCell<dyn Device>> = rtc.clone();
        let csr_dev: Rc<RefCell<dyn Device>> = csr.clone();
        let csr_alias_dev: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(CsrAliasWindow(csr.clone())));
        let mapper_window_dev: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(crate::mapper::MapperWindow(mapper.clone())));

        let mut regions = Vec::new();
        let ram_region = regions.len();
        regions.push(region("RAM", 0x000000, mem_size, true, ram));
        let mapram_region = regions.len();
        regions.push(region("MAPRAM", 0x000000, 0, true, mapram));
        regions.push(region("ROM_U17", 0x800000, 32 * 1024, false, rom17));
        regions.push(region("ROM_U15", 0x808000, 32 * 1024, false, rom15));
        regions.push(region("MAPPER_WINDOW", 0x900000, 16 * 1024, false, mapper_window_dev));
        regions.push(region("UART", 0xA00000, 0x30000, true, uart_dev));
        regions.push(region("SCSI_BUFFER", 0xA70000, 4, false, scsi_buf));
        regions.push(region("MBUS_IO", 0xB00000, 512 * 1024, false, mbus_io));
        regions.push(region("MBUS_MEM", 0xB80000, 512 * 1024, false, mbus_mem));
        regions.push(region("SRAM", 0xC00000, 16 * 1024, true, sram));
        regions.push(region("RTC", 0xD00000, 28 + 100, false, rtc_dev));
        let csr_region = regions.len();
        regions.push(region("CSR", 0xE00000, 32, false, csr_dev));
        let csr_alias_region = regions.len();
        regions.push(region("CSR_ALIAS", 0xE00020, 480, false, csr_alias_dev));

        let bus = Bus::new(
            regions,
            ram_region,
            mapram_region,
            csr_region,
            csr_alias_region,
            mem_size,
            mapper.clone(),
            csr.clone(),
            interrupts.clone(),
        );

        Ok(Machine {
            bus,
            mapper,
            csr,
            scsi,
            interrupts,
            uart,
            rtc,
            dma_cpu: None,
            job_cpu: None,
            leftover_cycles: [0, 0],
            realtime: config.realtime,
            emulated_us: 0,
            last_pace: None,
            syscall_trace: config.syscall_trace,
        })
    }

    pub fn attach_cpus(&mut self, dma: Box<dyn CpuCore>, job: Box<dyn CpuCore>) {
        self.dma_cpu = Some(dma);
        self.job_cpu = Some(job);
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn console_byte_in(&mut self, byte: u8) {
        self.uart.borrow_mut().console_mut().push_console_byte(byte);
    }

    pub fn syscall_trace(&self) -> bool {
        self.syscall_trace
    }

    /// Drains any SCSI control-register write CSR staged, applying it with
    /// the bus as a one-shot context argument (see DESIGN.md on breaking the
    /// CSR/SCSI/fabric reference cycle).
    fn drain_pending_scsireg(&mut self) {
        if let Some(value) = self.bus.take_pending_scsireg_write() {
            let scsi = self.scsi.clone();
            scsi.borrow_mut().set_scsireg(&mut self.bus, value);
        }
    }

    fn run_cpu_slice(&mut self, cpu: CpuId) {
        let reset = self.csr.borrow().is_cpu_reset(cpu);
        let mut slot = match cpu {
            CpuId::Dma => self.dma_cpu.take(),
            CpuId::Job => self.job_cpu.take(),
        };
        if let Some(core) = slot.as_deref_mut() {
            if reset {
                core.pulse_reset();
                self.leftover_cycles[cpu.index()] = 0;
            } else {
                let level = self.interrupts.borrow_mut().table_mut(cpu).highest();
                core.set_irq(level);
                let budget = QUANTUM_CYCLES + self.leftover_cycles[cpu.index()];
                let spent = core.step(&mut self.bus, budget);
                self.leftover_cycles[cpu.index()] = spent.saturating_sub(budget);
            }
        }
        match cpu {
            CpuId::Dma => self.dma_cpu = slot,
            CpuId::Job => self.job_cpu = slot,
        }
    }

    /// Runs one scheduler quantum: DMA slice, peripheral tick, JOB slice.
    pub fn step(&mut self) {
        self.run_cpu_slice(CpuId::Dma);
        self.drain_pending_scsireg();

        let scsi = self.scsi.clone();
        scsi.borrow_mut().tick(QUANTUM_US, &mut self.bus);
        self.rtc.borrow_mut().tick(QUANTUM_US);

        self.run_cpu_slice(CpuId::Job);
        self.drain_pending_scsireg();

        self.emulated_us += QUANTUM_US as u64;
        if self.realtime {
            self.pace();
        }
    }

    fn pace(&mut self) {
        let now = Instant::now();
        let last = *self.last_pace.get_or_insert(now);
        let elapsed = now.duration_since(last);
        if elapsed.as_millis() < PACE_INTERVAL_MS as u128 {
            return;
        }
        let target = std::time::Duration::from_micros(self.emulated_us);
        let wall = elapsed;
        if target > wall {
            let sleep_for = (target - wall).max(std::time::Duration::from_millis(1));
            std::thread::sleep(sleep_for);
        }
        self.last_pace = Some(Instant::now());
        self.emulated_us = 0;
    }

    pub fn run(&mut self) {
        loop {
            self.step();
        }
    }
}
