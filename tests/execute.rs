//! End-to-end scenarios that actually run generated code.
//!
//! Only built on architectures the execution harness supports; the
//! instruction encodings below are the single no-op and return encodings
//! for each of them.

#![cfg(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "riscv64",
))]

use execbuf::{ExecBuffer, Mode};
use std::time::Duration;

fn logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writes a single return instruction at offset 0.
fn write_ret(buf: &mut ExecBuffer) {
    cfg_if::cfg_if! {
        if #[cfg(any(target_arch = "x86_64", target_arch = "x86"))] {
            buf.as_mut_slice()[0] = 0xc3;
        } else if #[cfg(target_arch = "aarch64")] {
            buf.elements::<u32>().set(0, 0xd65f_03c0);
        } else if #[cfg(target_arch = "riscv64")] {
            buf.elements::<u32>().set(0, 0x0000_8067);
        }
    }
}

/// Fills the buffer with no-ops and puts a return instruction at the end.
fn write_nop_sled(buf: &mut ExecBuffer) {
    cfg_if::cfg_if! {
        if #[cfg(any(target_arch = "x86_64", target_arch = "x86"))] {
            let bytes = buf.as_mut_slice();
            let last = bytes.len() - 1;
            bytes[..last].fill(0x90);
            bytes[last] = 0xc3;
        } else {
            #[cfg(target_arch = "aarch64")]
            const NOP: u32 = 0xd503_201f;
            #[cfg(target_arch = "aarch64")]
            const RET: u32 = 0xd65f_03c0;
            #[cfg(target_arch = "riscv64")]
            const NOP: u32 = 0x0000_0013;
            #[cfg(target_arch = "riscv64")]
            const RET: u32 = 0x0000_8067;

            let mut words = buf.elements::<u32>();
            let last = words.len() - 1;
            for i in 0..last {
                words.set(i, NOP);
            }
            words.set(last, RET);
        }
    }
}

#[test]
fn executes_a_minimal_return() {
    logging();
    let mut buf = ExecBuffer::with_at_least(1).expect("allocated buffer");
    write_ret(&mut buf);

    let elapsed = unsafe { buf.execute() }.expect("executed buffer");
    assert_eq!(buf.mode(), Mode::Executable);

    // A single return instruction should take nowhere near this long even
    // on a heavily loaded host; the bound only has to catch runaways.
    assert!(
        elapsed < Duration::from_millis(250),
        "a lone return took {elapsed:?}",
    );
}

#[test]
fn executes_after_an_explicit_transition() {
    logging();
    let mut buf = ExecBuffer::with_at_least(1).expect("allocated buffer");
    write_ret(&mut buf);

    buf.set_executable().expect("made executable");
    // Already executable: execute() must not need another transition.
    unsafe { buf.execute() }.expect("executed buffer");
}

#[test]
fn duration_scales_with_nop_sled_size() {
    logging();

    let run = |size: usize| {
        let mut buf = ExecBuffer::with_at_least(size).expect("allocated buffer");
        write_nop_sled(&mut buf);
        unsafe { buf.execute() }.expect("executed buffer")
    };

    // The original use case: a hundred-megabyte run of single-byte no-ops
    // takes measurably longer to step through than a small one.
    let small = run(0x10000);
    let large = run(100_000_000);
    assert!(
        large > small,
        "expected {} bytes of no-ops ({large:?}) to outlast {} bytes ({small:?})",
        100_000_000,
        0x10000,
    );
}

/// Code written after a round trip back to writable mode is what actually
/// executes, not a stale instruction-cache view of the first version.
#[cfg(target_arch = "x86_64")]
#[test]
fn rewritten_code_is_what_runs() {
    logging();

    let mut slot: Box<u32> = Box::new(0);
    let slot_addr = (&mut *slot as *mut u32 as u64).to_le_bytes();

    // movabs rax, <slot>; mov dword ptr [rax], <marker>; ret
    let mut code = Vec::new();
    code.extend_from_slice(&[0x48, 0xb8]);
    code.extend_from_slice(&slot_addr);
    code.extend_from_slice(&[0xc7, 0x00]);
    let marker_offset = code.len();
    code.extend_from_slice(&0x1111_1111u32.to_le_bytes());
    code.push(0xc3);

    let mut buf = ExecBuffer::with_at_least(code.len()).expect("allocated buffer");
    buf.elements::<u8>().copy_in(&code, 0);

    unsafe { buf.execute() }.expect("executed buffer");
    assert_eq!(*slot, 0x1111_1111);

    // Patch only the stored marker and run the same buffer again.
    buf.set_writable().expect("made writable");
    buf.elements::<u8>()
        .copy_in(&0x2222_2222u32.to_le_bytes(), marker_offset);

    unsafe { buf.execute() }.expect("executed buffer");
    assert_eq!(*slot, 0x2222_2222);
}
