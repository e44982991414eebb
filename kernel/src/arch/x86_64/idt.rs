//! Interrupt descriptor table.
//!
//! CPU exceptions (internal gates) are wired straight to handlers that print
//! a register dump and panic; none of them are recoverable at this stage.
//! IRQ0 (timer) and IRQ1 (keyboard) are the only external gates in use —
//! both send EOI to the PIC and then hand off to the relevant subsystem.
//! Syscalls arrive through `SYSCALL`/`SYSRET`, not a software interrupt
//! vector, so there is no `int 0x80` gate here.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::irq;

const TIMER_VECTOR: u8 = irq::EXTERNAL_BASE; // 0x20
const KEYBOARD_VECTOR: u8 = irq::EXTERNAL_BASE + 1; // 0x21

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        // SAFETY: the double-fault IST index points at the dedicated stack
        // gdt::init() installed in the TSS; a fault on an already-corrupt
        // kernel stack still has somewhere safe to land.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt[TIMER_VECTOR as usize].set_handler_fn(timer_interrupt_handler);
        idt[KEYBOARD_VECTOR as usize].set_handler_fn(keyboard_interrupt_handler);
        idt
    };
}

pub fn init() {
    IDT.load();
    irq::init();
    // SAFETY: both lines now have a handler installed above; unmasking
    // before this point would let a vector fire with nothing registered.
    unsafe {
        use x86_64::instructions::port::Port;
        let mut pic1_data: Port<u8> = Port::new(0x21);
        let mask: u8 = pic1_data.read() & !0b0000_0011; // unmask IRQ0, IRQ1
        pic1_data.write(mask);
    }
}

extern "x86-interrupt" fn divide_error_handler(frame: InterruptStackFrame) {
    panic!("EXCEPTION: DIVIDE ERROR\n{:#?}", frame);
}

extern "x86-interrupt" fn invalid_opcode_handler(frame: InterruptStackFrame) {
    panic!("EXCEPTION: INVALID OPCODE\n{:#?}", frame);
}

extern "x86-interrupt" fn breakpoint_handler(frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", frame);
}

extern "x86-interrupt" fn double_fault_handler(frame: InterruptStackFrame, _error_code: u64) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", frame);
}

extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;
    panic!(
        "EXCEPTION: PAGE FAULT at {:?}, error {:?}\n{:#?}",
        Cr2::read(),
        error_code,
        frame
    );
}

extern "x86-interrupt" fn general_protection_fault_handler(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: GENERAL PROTECTION FAULT, code {:#x}\n{:#?}",
        error_code, frame
    );
}

extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    let _scope = irq::enter_interrupt();
    crate::arch::x86_64::timer::tick();
    // SAFETY: the EOI must reach the PIC before returning or no further
    // interrupt on this line (or any lower-priority line) will be delivered.
    unsafe {
        crate::arch::x86_64::PICS
            .lock()
            .notify_end_of_interrupt(TIMER_VECTOR);
    }
    if irq::take_yield_on_return() {
        drop(_scope);
        crate::sched::yield_from_interrupt();
    }
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_frame: InterruptStackFrame) {
    let _scope = irq::enter_interrupt();
    crate::drivers::keyboard::on_interrupt();
    // SAFETY: see timer_interrupt_handler.
    unsafe {
        crate::arch::x86_64::PICS
            .lock()
            .notify_end_of_interrupt(KEYBOARD_VECTOR);
    }
    if irq::take_yield_on_return() {
        drop(_scope);
        crate::sched::yield_from_interrupt();
    }
}
