//! KPIO Process Lifecycle Library
//!
//! 이 크레이트는 커널의 프로세스 생명주기 서브시스템을 제공합니다:
//! `fork`, `execv`, `exit`, `waitpid`, `getpid`.
//!
//! # 용도
//!
//! - [`process::ProcessManager`]: 프로세스 테이블과 생명주기 연산
//! - [`syscall`]: 레지스터 프레임 기반 시스템 콜 디스패치
//! - [`hosted`]: 호스트에서 실행되는 협력자 구현 (테스트, 데모)
//!
//! Address spaces, the filesystem, the executable loader and the scheduler
//! are collaborators behind the traits in [`memory`], [`vfs`], [`loader`]
//! and [`scheduler`].

pub mod config;
pub mod error;
pub mod hosted;
pub mod loader;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod syscall;
pub mod vfs;

pub use error::{ProcError, ProcResult};
