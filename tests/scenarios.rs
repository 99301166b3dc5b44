// Integration scenarios from SPEC_FULL.md §8, built against the public
// Bus/Mapper/Csr/Scsi APIs the way the teacher's tests/tests.rs drove its
// Bus/CPU through a fixture, without depending on a real CpuCore
// implementation (out of scope per §1).

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use plexus20::bus::{Access, Bus, Device, MemoryRegion};
use plexus20::cpu::{CpuId, InterruptTables, InterruptTablesHandle};
use plexus20::csr::{Csr, CsrAliasWindow, INT_LEVEL_JOB};
use plexus20::devices::{MapRam, Ram, Rom};
use plexus20::mapper::{Mapper, MapperWindow};
use plexus20::scsi::ScsiController;
use plexus20::scsi_hd::ScsiHardDisk;
use plexus20::size::Width;

const MEM_SIZE: u32 = 2 * 1024 * 1024;

/// Byte offset of the CSR's MISC register within the primary CSR window
/// (see csr.rs's register layout).
const CSR_MISC_OFFSET: u32 = 0x16;

struct Fixture {
    bus: Bus,
    mapper: Rc<RefCell<Mapper>>,
    csr: Rc<RefCell<Csr>>,
    interrupts: InterruptTablesHandle,
}

fn build_fixture(rom_u17: Vec<u8>) -> Fixture {
    let physram = Rc::new(RefCell::new(vec![0u8; MEM_SIZE as usize]));
    let interrupts = InterruptTables::handle();
    let mapper = Rc::new(RefCell::new(Mapper::new(physram.clone(), true)));
    let scsi = Rc::new(RefCell::new(ScsiController::new(interrupts.clone())));
    let csr = Rc::new(RefCell::new(Csr::new(scsi, mapper.clone(), interrupts.clone())));

    let ram: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Ram::new(physram)));
    let mapram: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(MapRam::new(mapper.clone())));
    let rom17: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Rom::new(rom_u17, 32 * 1024)));
    let mapper_window: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(MapperWindow(mapper.clone())));
    let csr_dev: Rc<RefCell<dyn Device>> = csr.clone();
    let csr_alias_dev: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(CsrAliasWindow(csr.clone())));

    let mut regions = Vec::new();
    let ram_region = regions.len();
    regions.push(MemoryRegion { name: "RAM", base: 0, size: MEM_SIZE, user_accessible: true, device: ram });
    let mapram_region = regions.len();
    regions.push(MemoryRegion { name: "MAPRAM", base: 0, size: 0, user_accessible: true, device: mapram });
    regions.push(MemoryRegion { name: "ROM_U17", base: 0x800000, size: 32 * 1024, user_accessible: false, device: rom17 });
    regions.push(MemoryRegion { name: "MAPPER_WINDOW", base: 0x900000, size: 16 * 1024, user_accessible: false, device: mapper_window });
    let csr_region = regions.len();
    regions.push(MemoryRegion { name: "CSR", base: 0xE00000, size: 32, user_accessible: false, device: csr_dev });
    let csr_alias_region = regions.len();
    regions.push(MemoryRegion { name: "CSR_ALIAS", base: 0xE00020, size: 480, user_accessible: false, device: csr_alias_dev });

    let bus = Bus::new(regions, ram_region, mapram_region, csr_region, csr_alias_region, MEM_SIZE, mapper.clone(), csr.clone(), interrupts.clone());
    Fixture { bus, mapper, csr, interrupts }
}

#[test]
fn scenario_boot_aliasing() {
    let mut rom = vec![0u8; 32 * 1024];
    rom[4..8].copy_from_slice(&0xCAFEBABEu32.to_be_bytes());
    let mut f = build_fixture(rom);

    f.bus.set_force_a23(CpuId::Job, true);
    let access = Access::read(true, false);
    let value = f.bus.read(CpuId::Job, 0x000004, Width::Long, access).unwrap();
    assert_eq!(value, 0xCAFEBABE);

    f.bus.set_force_a23(CpuId::Job, false);
    let value = f.bus.read(CpuId::Job, 0x000004, Width::Long, access).unwrap();
    assert_eq!(value, 0);
}

#[test]
fn scenario_mapper_activation() {
    let mut f = build_fixture(vec![0u8; 32 * 1024]);
    f.mapper.borrow_mut().set_sysmode(true);
    let sys_access = Access::write(true);

    // Map system page 0 to physical page 0x42, no inhibit bits: each page
    // table entry is two 16-bit words (w0, w1), four bytes apart; system
    // page 0 is entry 2048, so its w1 sits at byte offset 2048 * 4 + 2.
    f.bus.write(CpuId::Job, 0x900000 + 2048 * 4 + 2, Width::Word, 0x0042, sys_access).unwrap();

    // Mapper starts disabled; CSR's MISC register bit 0 is active-low.
    f.bus.write(CpuId::Job, 0xE00000 + CSR_MISC_OFFSET, Width::Word, 0, sys_access).unwrap();

    f.bus.write(CpuId::Job, 0x000000, Width::Long, 0xdeadbeef, sys_access).unwrap();
    let value = f.bus.read(CpuId::Job, 0x000000, Width::Long, Access::read(true, false)).unwrap();
    assert_eq!(value, 0xdeadbeef);
}

#[test]
fn scenario_user_id_mismatch() {
    let f = build_fixture(vec![0u8; 32 * 1024]);
    f.mapper.borrow_mut().set_mapid(7);
    let err = f
        .mapper
        .borrow()
        .access_allowed(0, plexus20::mapper::ACCESS_W)
        .unwrap_err();
    match err {
        plexus20::error::MapFault::UserId(uid) => assert_eq!(uid, 0),
        other => panic!("expected UserId fault, got {:?}", other),
    }
}

#[test]
fn scenario_soft_interrupt_round_trip() {
    let mut f = build_fixture(vec![0u8; 32 * 1024]);
    let access = Access::write(true);
    f.bus.write(CpuId::Job, 0xE00020 + 0x60, Width::Word, 0, access).unwrap();
    assert_eq!(f.interrupts.borrow().job.highest(), INT_LEVEL_JOB);

    f.bus.write(CpuId::Job, 0xE00020 + 0x40, Width::Word, 0, access).unwrap();
    assert!(f.interrupts.borrow().job.is_empty());
}

#[test]
fn scenario_scsi_read() {
    let mut data = vec![0u8; 512];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (0xA0 + i / 256) as u8;
    }
    let path = std::env::temp_dir().join("plexus20-scenario-hd.img");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&data).unwrap();

    let mut hd = ScsiHardDisk::open(path, None).unwrap();
    use plexus20::scsi::{ScsiTarget, TargetResponse};
    let cdb = [0x08, 0, 0, 0, 1, 0];
    assert_eq!(hd.handle_cmd(&cdb), TargetResponse::DataIn);
    let mut buf = vec![0u8; 512];
    let n = hd.handle_data_in(&mut buf);
    assert_eq!(n, 512);
    assert_eq!(buf, data);
}
