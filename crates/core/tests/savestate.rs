//! Save-state round-trip property: `save_state` then `load_state` then
//! `save_state` again must produce identical bytes.

use std::io::{Read, Seek, SeekFrom};

use dreamon_core::common::config::Config;
use dreamon_core::soc::system::System;

fn config() -> Config {
    Config {
        use_jit: false,
        ram_size: 64 * 1024,
        sound_ram_size: 16 * 1024,
        ..Config::default()
    }
}

#[test]
fn save_load_save_round_trips_to_identical_bytes() {
    let mut system = System::new(config());
    system.sh4_mut().cpu.regs.r[7] = 0x1234_5678;
    system.sh4_mut().cpu.regs.pc = 0x8C00_0100;

    let mut first = Vec::new();
    system.save_state(&mut first).unwrap();

    let mut reloaded = System::new(config());
    reloaded.load_state(&mut first.as_slice()).unwrap();

    let mut second = Vec::new();
    reloaded.save_state(&mut second).unwrap();

    assert_eq!(first, second);
}

#[test]
fn save_state_round_trips_through_a_file() {
    let mut system = System::new(config());
    system.sh4_mut().cpu.regs.r[3] = 0xCAFE_BABE;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    system.save_state(file.as_file_mut()).unwrap();
    file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();

    let mut bytes = Vec::new();
    file.as_file_mut().read_to_end(&mut bytes).unwrap();

    let mut restored = System::new(config());
    restored.load_state(&mut bytes.as_slice()).unwrap();
    assert_eq!(restored.sh4_mut().cpu.regs.r[3], 0xCAFE_BABE);
}

#[test]
fn wrong_ram_size_is_rejected_by_arm7_window_length_check() {
    let mut system = System::new(config());
    let mut buf = Vec::new();
    system.save_state(&mut buf).unwrap();

    let mismatched = Config {
        sound_ram_size: config().sound_ram_size * 2,
        ..config()
    };
    let mut restored = System::new(mismatched);
    assert!(restored.load_state(&mut buf.as_slice()).is_err());
}
