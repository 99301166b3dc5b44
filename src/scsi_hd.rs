// SCSI-1 hard disk target. Grounded on original_source/scsi_hd.c's command
// dispatch switch and its copy-on-write overlay helpers.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::error::EmulatorError;
use crate::scsi::{ScsiTarget, TargetResponse};

const SECTOR_SIZE: usize = 512;
const COW_VERSION: u16 = 1;

const CMD_TEST_UNIT_READY: u8 = 0x00;
const CMD_REZERO: u8 = 0x01;
const CMD_REQUEST_SENSE: u8 = 0x03;
const CMD_READ6: u8 = 0x08;
const CMD_WRITE6: u8 = 0x0A;
const CMD_MODE_SELECT: u8 = 0x15;
const CMD_VENDOR: u8 = 0xC2;

const STATUS_OK: u8 = 0x00;
const STATUS_ERR: u8 = 0x02;

/// Copy-on-write overlay store: one file per logical block, named
/// `cow-data-<LBA>.bin` with LBA zero-padded to six digits, matching the
/// original's `%06d` formatting. Each file is a two-byte version tag
/// followed by a 512-byte sector.
pub struct CowStore {
    dir: PathBuf,
}

impl CowStore {
    pub fn open(dir: PathBuf) -> Result<Self, EmulatorError> {
        std::fs::create_dir_all(&dir).map_err(|source| EmulatorError::CowDirectory {
            path: dir.clone(),
            source,
        })?;
        Ok(CowStore { dir })
    }

    fn path_for(&self, lba: u32) -> PathBuf {
        self.dir.join(format!("cow-data-{:06}.bin", lba))
    }

    fn read(&self, lba: u32) -> Option<[u8; SECTOR_SIZE]> {
        let mut file = File::open(self.path_for(lba)).ok()?;
        let mut header = [0u8; 2];
        file.read_exact(&mut header).ok()?;
        let version = u16::from_be_bytes(header);
        if version != COW_VERSION {
            return None;
        }
        let mut sector = [0u8; SECTOR_SIZE];
        file.read_exact(&mut sector).ok()?;
        Some(sector)
    }

    fn write(&self, lba: u32, sector: &[u8; SECTOR_SIZE]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(self.path_for(lba))?;
        file.write_all(&COW_VERSION.to_be_bytes())?;
        file.write_all(sector)?;
        Ok(())
    }
}

pub struct ScsiHardDisk {
    image: File,
    cow: Option<CowStore>,
    sense: [u8; 4],
    last_status: u8,
    cur_lba: u32,
    cur_blocks: u32,
    cur_cmd: u8,
    sense_requested: bool,
    sense_alloc_len: usize,
}

impl ScsiHardDisk {
    pub fn open(path: PathBuf, cow: Option<CowStore>) -> Result<Self, EmulatorError> {
        let image = OpenOptions::new()
            .read(true)
            .write(cow.is_none())
            .open(&path)
            .map_err(|source| EmulatorError::HardDiskImage { path, source })?;
        Ok(ScsiHardDisk {
            image,
            cow,
            sense: [0; 4],
            last_status: STATUS_OK,
            cur_lba: 0,
            cur_blocks: 0,
            cur_cmd: 0,
            sense_requested: false,
            sense_alloc_len: 0,
        })
    }

    fn read_block(&mut self, lba: u32) -> [u8; SECTOR_SIZE] {
        if let Some(cow) = &self.cow {
            if let Some(sector) = cow.read(lba) {
                return sector;
            }
        }
        let mut sector = [0u8; SECTOR_SIZE];
        if self.image.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64)).is_ok() {
            let _ = self.image.read_exact(&mut sector);
        }
        sector
    }

    fn write_block(&mut self, lba: u32, sector: &[u8; SECTOR_SIZE]) {
        if let Some(cow) = &self.cow {
            let _ = cow.write(lba, sector);
            return;
        }
        if self.image.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64)).is_ok() {
            let _ = self.image.write_all(sector);
        }
    }

    fn lba_blocks_read6(cdb: &[u8]) -> (u32, u32) {
        let lba = ((cdb[1] as u32 & 0x1f) << 16) | ((cdb[2] as u32) << 8) | cdb[3] as u32;
        let blocks = if cdb[4] == 0 { 256 } else { cdb[4] as u32 };
        (lba, blocks)
    }
}

impl ScsiTarget for ScsiHardDisk {
    fn handle_cmd(&mut self, cdb: &[u8]) -> TargetResponse {
        self.last_status = STATUS_OK;
        self.sense_requested = false;
        self.cur_cmd = cdb.first().copied().unwrap_or(0);
        match cdb.first().copied() {
            Some(CMD_TEST_UNIT_READY) | Some(CMD_REZERO) => TargetResponse::Status,
            Some(CMD_MODE_SELECT) | Some(CMD_VENDOR) => TargetResponse::DataOut,
            Some(CMD_REQUEST_SENSE) => {
                self.sense_requested = true;
                self.sense_alloc_len = match cdb.get(4).copied().unwrap_or(0) {
                    0 => 4,
                    n => n as usize,
                };
                TargetResponse::DataIn
            }
            Some(CMD_READ6) => {
                let (lba, blocks) = Self::lba_blocks_read6(cdb);
                self.cur_lba = lba;
                self.cur_blocks = blocks;
                TargetResponse::DataIn
            }
            Some(CMD_WRITE6) => {
                let (lba, blocks) = Self::lba_blocks_read6(cdb);
                self.cur_lba = lba;
                self.cur_blocks = blocks;
                TargetResponse::DataOut
            }
            _ => {
                self.last_status = STATUS_ERR;
                TargetResponse::Status
            }
        }
    }

    fn handle_data_in(&mut self, buf: &mut [u8]) -> usize {
        self.read_payload(buf)
    }

    fn handle_data_out(&mut self, buf: &[u8]) {
        self.write_payload(buf);
    }

    fn handle_status(&mut self) -> u8 {
        self.last_status
    }
}

impl ScsiHardDisk {
    fn read_payload(&mut self, buf: &mut [u8]) -> usize {
        if self.sense_requested {
            let len = buf.len().min(self.sense_alloc_len).min(self.sense.len());
            buf[..len].copy_from_slice(&self.sense[..len]);
            return len;
        }
        let blocks = (self.cur_blocks as usize).min(buf.len() / SECTOR_SIZE);
        for i in 0..blocks {
            let sector = self.read_block(self.cur_lba + i as u32);
            buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].copy_from_slice(&sector);
        }
        blocks * SECTOR_SIZE
    }

    /// MODE SELECT and the vendor config command carry a data-out phase
    /// whose payload is ignored; only WRITE6 actually commits blocks.
    fn write_payload(&mut self, buf: &[u8]) {
        if self.cur_cmd != CMD_WRITE6 {
            return;
        }
        let blocks = buf.len() / SECTOR_SIZE;
        for i in 0..blocks {
            let mut sector = [0u8; SECTOR_SIZE];
            sector.copy_from_slice(&buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
            self.write_block(self.cur_lba + i as u32, &sector);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn image_with(bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("plexus20-hd-test-{:p}.img", bytes.as_ptr()));
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn read6_returns_bytes_from_base_image() {
        let mut data = vec![0u8; SECTOR_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (0xA0 + i / 256) as u8;
        }
        let path = image_with(&data);
        let mut hd = ScsiHardDisk::open(path, None).unwrap();
        let cdb = [CMD_READ6, 0, 0, 0, 1, 0];
        assert_eq!(hd.handle_cmd(&cdb), TargetResponse::DataIn);
        let mut buf = vec![0u8; SECTOR_SIZE];
        let n = hd.handle_data_in(&mut buf);
        assert_eq!(n, SECTOR_SIZE);
        assert_eq!(buf, data);
        assert_eq!(hd.handle_status(), STATUS_OK);
    }

    #[test]
    fn cow_write_then_read_round_trips_without_touching_base() {
        let base = vec![0u8; SECTOR_SIZE];
        let path = image_with(&base);
        let cow_dir = std::env::temp_dir().join(format!("plexus20-cow-test-{:p}", path.as_path()));
        let cow = CowStore::open(cow_dir).unwrap();
        let mut hd = ScsiHardDisk::open(path, Some(cow)).unwrap();
        let write_cdb = [CMD_WRITE6, 0, 0, 0, 1, 0];
        hd.handle_cmd(&write_cdb);
        let mut payload = vec![0u8; SECTOR_SIZE];
        payload.iter_mut().for_each(|b| *b = 0x5A);
        hd.handle_data_out(&payload);

        let read_cdb = [CMD_READ6, 0, 0, 0, 1, 0];
        hd.handle_cmd(&read_cdb);
        let mut buf = vec![0u8; SECTOR_SIZE];
        hd.handle_data_in(&mut buf);
        assert_eq!(buf, payload);
    }

    #[test]
    fn unknown_opcode_returns_error_status() {
        let path = image_with(&[0u8; SECTOR_SIZE]);
        let mut hd = ScsiHardDisk::open(path, None).unwrap();
        let cdb = [0xFF, 0, 0, 0, 0, 0];
        assert_eq!(hd.handle_cmd(&cdb), TargetResponse::Status);
        assert_eq!(hd.handle_status(), STATUS_ERR);
    }
}
