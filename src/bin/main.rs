use std::io::Read;
use std::process;

use termion::async_stdin;
use termion::raw::IntoRawMode;

use plexus20::config::Configuration;
use plexus20::{logging, Machine};

const SIGINT_BYTE: u8 = 0x03;
const SIGQUIT_BYTE: u8 = 0x1C;
const SIGTSTP_BYTE: u8 = 0x1A;
const CONSECUTIVE_SIGINT_QUIT: u32 = 3;

/// Non-canonical stdin fed into UART-A channel B. Raw mode already turns
/// Ctrl-C/Ctrl-\/Ctrl-Z into literal 0x03/0x1C/0x1A bytes instead of
/// signals; this only has to watch for three of those in a row (§6).
struct Console {
    stdin: termion::AsyncReader,
    _raw: termion::raw::RawTerminal<std::io::Stdout>,
    consecutive_sigint: u32,
}

impl Console {
    fn new() -> std::io::Result<Self> {
        Ok(Console {
            stdin: async_stdin(),
            _raw: std::io::stdout().into_raw_mode()?,
            consecutive_sigint: 0,
        })
    }

    fn poll(&mut self, machine: &mut Machine) {
        let mut buf = [0u8; 64];
        let Ok(n) = self.stdin.read(&mut buf) else { return };
        for &byte in &buf[..n] {
            match byte {
                SIGINT_BYTE => {
                    self.consecutive_sigint += 1;
                    if self.consecutive_sigint >= CONSECUTIVE_SIGINT_QUIT {
                        process::exit(0);
                    }
                }
                SIGQUIT_BYTE | SIGTSTP_BYTE => self.consecutive_sigint = 0,
                _ => self.consecutive_sigint = 0,
            }
            machine.console_byte_in(byte);
        }
    }
}

fn main() {
    let config = match Configuration::from_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("plexus20: {}", err);
            eprintln!("{}", Configuration::usage());
            process::exit(1);
        }
    };

    logging::init(&config);

    let mut machine = match Machine::new(&config) {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("plexus20: {}", err);
            process::exit(1);
        }
    };

    let mut console = match Console::new() {
        Ok(console) => console,
        Err(err) => {
            eprintln!("plexus20: failed to attach console: {}", err);
            process::exit(1);
        }
    };

    log::info!(target: "emu", "starting Plexus P/20 emulation, {} MiB RAM", config.mem_size / (1024 * 1024));
    loop {
        machine.step();
        console.poll(&mut machine);
    }
}
