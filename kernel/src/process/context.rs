//! Process Context
//!
//! Saved user register frame (x86_64). A syscall receives the caller's frame,
//! fork copies it into the child, and exec builds a fresh one for the new
//! image's entry point.

/// User code segment selector (GDT index 4, RPL 3).
pub const USER_CS: u16 = 0x23;

/// User data segment selector (GDT index 3, RPL 3).
pub const USER_DS: u16 = 0x1B;

/// RFLAGS for user entry: IF set, reserved bit 1 set.
const USER_RFLAGS: u64 = 0x200 | 0x2;

/// Saved CPU register frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ProcessContext {
    // Callee-saved
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,

    // Caller-saved
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    /// Syscall number on entry, return value on exit
    pub rax: u64,

    pub ds: u64,
    pub es: u64,

    // Interrupt frame
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Everything needed to start a freshly loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEntry {
    /// Number of arguments
    pub argc: u64,
    /// Address of the argument pointer array
    pub argv: u64,
    /// Initial stack pointer
    pub stack_pointer: u64,
    /// Program entry point
    pub entry_point: u64,
}

impl ProcessContext {
    /// Create an all-zero frame.
    pub const fn new() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rax: 0,
            ds: 0,
            es: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// Frame that starts a new image: `rdi = argc`, `rsi = argv`.
    pub fn new_user(entry: &UserEntry) -> Self {
        Self {
            rdi: entry.argc,
            rsi: entry.argv,
            ds: USER_DS as u64,
            es: USER_DS as u64,
            rip: entry.entry_point,
            cs: USER_CS as u64,
            rflags: USER_RFLAGS,
            rsp: entry.stack_pointer,
            ss: USER_DS as u64,
            ..Self::new()
        }
    }

    /// Copy of this frame as the child of a fork sees it: the same
    /// instruction and stack pointers, with the syscall returning 0.
    pub fn fork_child(&self) -> Self {
        let mut child = *self;
        child.set_syscall_return(0);
        child
    }

    /// Get syscall number (from RAX)
    pub fn syscall_num(&self) -> u64 {
        self.rax
    }

    /// Get syscall arguments
    pub fn syscall_args(&self) -> (u64, u64, u64, u64, u64, u64) {
        (self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9)
    }

    /// Set syscall return value
    pub fn set_syscall_return(&mut self, value: u64) {
        self.rax = value;
    }
}
