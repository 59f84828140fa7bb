//! End-to-end tests of process execution: demand loading, swap, the TLB,
//! and the system-call surface exercised by real (hand-assembled) user
//! programs.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{boot, install_program};
use ember_kernel::vm::AddressSpace;
use ember_kernel::ReplacementPolicy;
use ember_machine::{Control, Exception};

#[test]
fn a_program_runs_and_reports_its_exit_status() {
    let fixture = boot("exit", |_| {});
    install_program(&fixture, "exit7", &common::exit_program(7));
    let status = fixture.runtime.run_program("exit7", &[]).unwrap();
    assert_eq!(status, 7);
}

#[test]
fn demand_loading_faults_each_code_page_in_on_first_use() {
    let fixture = boot("demand", |config| {
        config.demand_loading = true;
    });
    install_program(&fixture, "twopage", &common::two_page_program(5));

    let faults_before = fixture
        .runtime
        .kernel
        .stats
        .num_page_faults
        .load(Ordering::Relaxed);
    let status = fixture.runtime.run_program("twopage", &[]).unwrap();
    assert_eq!(status, 5);

    let faults = fixture
        .runtime
        .kernel
        .stats
        .num_page_faults
        .load(Ordering::Relaxed)
        - faults_before;
    // At least the two code pages and the stack page.
    assert!(faults >= 3, "expected demand-loading faults, saw {faults}");
}

#[test]
fn page_table_and_core_map_stay_in_agreement() {
    let fixture = boot("coremap", |_| {});
    install_program(&fixture, "prog", &common::two_page_program(0));

    let kernel = &fixture.runtime.kernel;
    let exe = kernel.file_system.open("prog").unwrap();
    let clear_before = kernel.core_map.count_clear();
    let space = AddressSpace::new(kernel, exe, 17).unwrap();

    let mut mapped = 0;
    for vpn in 0..space.num_pages() as u32 {
        let entry = space.page(vpn);
        if !entry.valid {
            continue;
        }
        mapped += 1;
        let owner = kernel
            .core_map
            .get_space(entry.physical_page)
            .expect("frame has no owner");
        assert!(Arc::ptr_eq(&owner, &space));
        assert_eq!(kernel.core_map.get_vpn(entry.physical_page), vpn);
    }
    assert_eq!(mapped, space.num_pages());

    drop(space);
    assert_eq!(kernel.core_map.count_clear(), clear_before);
}

#[test]
fn eviction_round_trips_pages_through_the_swap_file() {
    let fixture = boot("swap", |config| {
        config.machine.num_phys_pages = 4;
        config.demand_loading = true;
        config.swap = true;
    });
    let pages = [2u32, 3, 4, 5, 6, 7];
    install_program(&fixture, "stress", &common::page_stress_program(&pages));

    let status = fixture.runtime.run_program("stress", &[]).unwrap();
    let expected: i32 = (1..=pages.len() as i32).sum();
    assert_eq!(status, expected);

    let stats = &fixture.runtime.kernel.stats;
    assert!(stats.num_pages_sent_to_swap.load(Ordering::Relaxed) > 0);
    assert!(stats.num_pages_loaded_from_swap.load(Ordering::Relaxed) > 0);

    // The per-process swap file is gone once the process is.
    assert!(fixture.runtime.kernel.file_system.open("/SWAP.0").is_err());
    assert!(fixture.runtime.kernel.file_system.check());
}

#[test]
fn clock_and_random_replacement_also_survive_memory_pressure() {
    for (tag, policy) in [
        ("swap-clock", ReplacementPolicy::Clock),
        ("swap-random", ReplacementPolicy::Random),
    ] {
        let fixture = boot(tag, |config| {
            config.machine.num_phys_pages = 4;
            config.demand_loading = true;
            config.swap = true;
            config.replacement = policy;
        });
        let pages = [2u32, 3, 4, 5, 6];
        install_program(&fixture, "stress", &common::page_stress_program(&pages));
        let status = fixture.runtime.run_program("stress", &[]).unwrap();
        assert_eq!(status, 15, "policy {policy:?} corrupted memory");
    }
}

#[test]
fn the_tlb_path_refills_on_misses() {
    let fixture = boot("tlb", |config| {
        config.machine.use_tlb = true;
        config.demand_loading = true;
    });
    install_program(&fixture, "twopage", &common::two_page_program(9));
    let status = fixture.runtime.run_program("twopage", &[]).unwrap();
    assert_eq!(status, 9);
}

#[test]
fn preemptive_timer_does_not_disturb_a_running_program() {
    let fixture = boot("timer", |config| {
        config.timer_quantum = Some(50);
        config.disable_periodic_yield = false;
        config.demand_loading = true;
    });
    let pages = [2u32, 3, 4];
    install_program(&fixture, "stress", &common::page_stress_program(&pages));
    let status = fixture.runtime.run_program("stress", &[]).unwrap();
    assert_eq!(status, 6);
}

#[test]
fn exec_marshals_argv_onto_the_child_stack() {
    let fixture = boot("argv", |config| {
        config.demand_loading = true;
    });
    install_program(&fixture, "argc", &common::exit_with_argc_program());
    let args = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    let status = fixture.runtime.run_program("argc", &args).unwrap();
    assert_eq!(status, 3);
}

#[test]
fn user_programs_reach_files_through_the_syscall_surface() {
    let fixture = boot("fileio", |_| {});
    let payload = b"written from user land";
    install_program(&fixture, "writer", &common::file_writer_program("out", payload));

    let status = fixture.runtime.run_program("writer", &[]).unwrap();
    assert_eq!(status, payload.len() as i32);

    let contents = fixture.runtime.read_file("out").unwrap();
    assert_eq!(contents, payload);
    assert!(fixture.runtime.kernel.file_system.check());
}

#[test]
fn console_output_arrives_on_the_sink() {
    let fixture = boot("console", |_| {});
    install_program(&fixture, "hello", &common::console_writer_program("hi there\n"));
    let status = fixture.runtime.run_program("hello", &[]).unwrap();
    assert_eq!(status, 0);
    assert_eq!(fixture.console.0.lock().as_slice(), b"hi there\n");
}

#[test]
fn read_only_faults_terminate_the_offender() {
    use ember_machine::TrapHandler;
    let fixture = boot("readonly", |_| {});
    let verdict = fixture
        .runtime
        .kernel
        .handle_trap(Exception::ReadOnlyFault { bad_vaddr: 0x40 });
    assert_eq!(verdict, Control::Terminate(-1));
}
