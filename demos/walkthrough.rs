//! Step-by-step tour of the segregated heap on top of the real program break.
//!
//! Run with `cargo run --example walkthrough` and inspect the process with
//! `pmap`, `gdb` or `/proc/<pid>/maps` at every pause. Pass `--no-pause` to
//! run straight through, and set `RUST_LOG=segalloc=trace` to watch the heap's
//! own log lines.

#[cfg(target_os = "linux")]
fn main() {
  use std::io::Read;
  use std::ptr::NonNull;

  use libc::sbrk;
  use segalloc::{AllocError, SbrkGrowth, SegregatedHeap};
  use tracing_subscriber::EnvFilter;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("segalloc=debug"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let pause = !std::env::args().any(|arg| arg == "--no-pause");

  // Waits until the user presses ENTER.
  let block_until_enter_pressed = || {
    if pause {
      println!("\n>>> Press ENTER to continue...");
      let _ = std::io::stdin().bytes().next();
    }
  };

  // The program break is the upper boundary of the data segment, which is
  // exactly where this heap lives.
  let print_program_break = |label: &str| {
    println!(
      "[{}] PID = {}, program break (sbrk(0)) = {:?}",
      label,
      std::process::id(),
      unsafe { sbrk(0) },
    );
  };

  let print_alloc = |size: usize, result: &Result<Option<NonNull<u8>>, AllocError>| match result {
    Ok(Some(ptr)) => println!(
      "Allocated {} bytes, address = {:?}, program break = {:?}",
      size,
      ptr,
      unsafe { sbrk(0) }
    ),
    Ok(None) => println!("Allocated nothing for {} bytes", size),
    Err(err) => println!("Allocation of {} bytes failed: {}", size, err),
  };

  print_program_break("start");
  block_until_enter_pressed();

  let mut heap = match SegregatedHeap::new(SbrkGrowth::new()) {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("could not set up the heap: {}", err);
      return;
    }
  };
  println!("Heap starts at {:?}", heap.heap_start());

  // --------------------------------------------------------------------
  // 1) A 10-byte request: rounds up to a 32-byte block and grows a whole
  //    batch of sixteen of them.
  // --------------------------------------------------------------------
  let first = heap.allocate(10);
  println!("\n[1] Allocate 10 bytes");
  print_alloc(10, &first);
  println!("[1] Free 32-byte blocks left in class 0: {:?}", heap.free_list_len(0));
  print_program_break("after first alloc");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) A second small request is served from the batch: no growth.
  // --------------------------------------------------------------------
  let second = heap.allocate(12);
  println!("\n[2] Allocate 12 bytes");
  print_alloc(12, &second);
  print_program_break("after second alloc");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first block and ask again: LIFO lists hand it straight back.
  // --------------------------------------------------------------------
  if let Ok(Some(first)) = first {
    unsafe { heap.deallocate(first.as_ptr()) };
    println!("\n[3] Deallocated first block at {:?}", first);

    let again = heap.allocate(2);
    print_alloc(2, &again);
    println!(
      "[3] reused the freed block? {}",
      if matches!(again, Ok(Some(ptr)) if ptr == first) {
        "Yes"
      } else {
        "No, it was merged with a neighbour first"
      }
    );
  }
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Grow an allocation with reallocate and watch the payload survive.
  // --------------------------------------------------------------------
  if let Ok(Some(block)) = heap.allocate(1000) {
    unsafe {
      block.as_ptr().cast::<u64>().write(0x1122334455667788);
      match heap.reallocate(block.as_ptr(), 2000) {
        Ok(Some(moved)) => {
          println!("\n[4] Reallocated 1000 -> 2000 bytes: {:?} -> {:?}", block, moved);
          println!("[4] Value carried over = 0x{:X}", moved.as_ptr().cast::<u64>().read());
        }
        Ok(None) => {}
        Err(err) => println!("\n[4] Reallocation failed: {}", err),
      }
    }
  }
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) A large request moves the program break by a single oversized block.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let big = heap.allocate(1024 * 1024);
  println!("\n[5] Allocate 1 MiB");
  print_alloc(1024 * 1024, &big);
  print_program_break("after large alloc");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Final picture.
  // --------------------------------------------------------------------
  let stats = heap.stats();
  println!("\n[6] {:#?}", stats);
  println!("[6] {:#?}", heap.counters());
  println!("[6] heap check passes? {}", heap.check());
  println!("\nThe heap never returns memory; the OS reclaims it when the process exits.");
}

#[cfg(not(target_os = "linux"))]
fn main() {
  println!("This walkthrough drives the program break with sbrk(2) and only runs on Linux.");
}
