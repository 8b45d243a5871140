//! Initial user stack construction.
//!
//! Layout, from the top of the stack down:
//!
//! ```text
//! stack_top (rounded down to 8)
//!   argv[0] bytes + NUL      <- argv[0], 8-aligned
//!   argv[1] bytes + NUL      <- argv[1], 8-aligned
//!   ...
//!   argv[argc-1] bytes + NUL <- argv[argc-1], 8-aligned
//!   NULL                     <- argv + 8 * argc
//!   argv[argc-1] pointer
//!   ...
//!   argv[0] pointer          <- argv == final stack pointer
//! ```
//!
//! Strings go first, each at the next lower 8-byte boundary that fits it,
//! then the pointer array (argc entries and a null) in one write.

use crate::config::{POINTER_SIZE, STACK_ALIGN};
use crate::error::{ProcError, ProcResult};
use crate::memory::user::{copyout, encode_ptr_array};
use crate::memory::{AddressSpace, UserAddr};

use super::context::UserEntry;

/// Where everything landed on a freshly built stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackLayout {
    /// Address of each argument string, in argument order
    pub arg_ptrs: Vec<UserAddr>,
    /// Address of the pointer array
    pub argv: UserAddr,
    /// Final stack pointer
    pub stack_pointer: UserAddr,
}

/// Compute the layout for `args` (each including its terminator) below
/// `stack_top` without touching memory.
pub fn plan(stack_top: UserAddr, args: &[Vec<u8>]) -> ProcResult<StackLayout> {
    let mut sp = stack_top.align_down(STACK_ALIGN);
    let mut arg_ptrs = Vec::with_capacity(args.len());

    for arg in args {
        sp = UserAddr(sp.0.checked_sub(arg.len() as u64).ok_or(ProcError::BadAddress)?)
            .align_down(STACK_ALIGN);
        arg_ptrs.push(sp);
    }

    sp = sp.align_down(STACK_ALIGN);
    let array_size = (args.len() as u64 + 1) * POINTER_SIZE;
    let argv = UserAddr(sp.0.checked_sub(array_size).ok_or(ProcError::BadAddress)?);

    Ok(StackLayout {
        arg_ptrs,
        argv,
        stack_pointer: argv,
    })
}

/// Write `args` onto the stack of `space` and return the entry frame values.
///
/// Any fault is reported as [`ProcError::BadAddress`]; the caller owns
/// rolling back the address space.
pub fn build_user_stack(
    space: &mut dyn AddressSpace,
    stack_top: UserAddr,
    args: &[Vec<u8>],
    entry_point: UserAddr,
) -> ProcResult<UserEntry> {
    let layout = plan(stack_top, args)?;

    for (arg, &addr) in args.iter().zip(&layout.arg_ptrs) {
        copyout(space, addr, arg).map_err(|_| ProcError::BadAddress)?;
    }

    let mut pointers = layout.arg_ptrs.clone();
    pointers.push(UserAddr::NULL);
    copyout(space, layout.argv, &encode_ptr_array(&pointers)).map_err(|_| ProcError::BadAddress)?;

    Ok(UserEntry {
        argc: args.len() as u64,
        argv: layout.argv.as_u64(),
        stack_pointer: layout.stack_pointer.as_u64(),
        entry_point: entry_point.as_u64(),
    })
}

/// Stage kernel-side strings the way `execv` stages user ones: each with
/// its terminator.
pub fn stage_kernel_args(args: &[&str], arg_max: usize, arg_len_max: usize) -> ProcResult<Vec<Vec<u8>>> {
    if args.len() > arg_max {
        return Err(ProcError::ArgumentTooLarge);
    }
    args.iter()
        .map(|arg| {
            if arg.len() + 1 > arg_len_max {
                return Err(ProcError::ArgumentTooLarge);
            }
            if arg.as_bytes().contains(&0) {
                return Err(ProcError::InvalidArgument("argument contains NUL"));
            }
            let mut staged = Vec::with_capacity(arg.len() + 1);
            staged.extend_from_slice(arg.as_bytes());
            staged.push(0);
            Ok(staged)
        })
        .collect()
}
