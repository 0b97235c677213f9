// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::MAX_EPOLL_EVENTS,
};
use ::libc::{
    epoll_create1,
    epoll_ctl,
    epoll_event,
    epoll_wait,
    EINTR,
    EPOLLIN,
    EPOLL_CLOEXEC,
    EPOLL_CTL_ADD,
    EPOLL_CTL_DEL,
};
use ::std::{
    collections::HashSet,
    io,
    os::unix::io::RawFd,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Level-triggered readiness poller over raw descriptors.
pub struct EventLoop {
    epoll_fd: RawFd,
    registered: HashSet<RawFd>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl EventLoop {
    pub fn new() -> Result<Self, Fail> {
        let epoll_fd: RawFd = match unsafe { epoll_create1(EPOLL_CLOEXEC) } {
            fd if fd >= 0 => fd,
            _ => {
                let e: io::Error = io::Error::last_os_error();
                error!("new(): could not create epoll instance ({:?})", e);
                return Err(Fail::from(e));
            },
        };
        Ok(Self {
            epoll_fd,
            registered: HashSet::new(),
        })
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.registered.contains(&fd)
    }

    pub fn registered(&self) -> impl Iterator<Item = &RawFd> {
        self.registered.iter()
    }

    /// Starts watching `fd` for input.
    pub fn register(&mut self, fd: RawFd) -> Result<(), Fail> {
        if !self.registered.insert(fd) {
            return Ok(());
        }
        let mut event: epoll_event = epoll_event {
            events: EPOLLIN as u32,
            u64: fd as u64,
        };
        match unsafe { epoll_ctl(self.epoll_fd, EPOLL_CTL_ADD, fd, &mut event) } {
            0 => {
                trace!("register(): fd={}", fd);
                Ok(())
            },
            _ => {
                self.registered.remove(&fd);
                let e: io::Error = io::Error::last_os_error();
                error!("register(): failed to watch fd {} ({:?})", fd, e);
                Err(Fail::from(e))
            },
        }
    }

    /// Stops watching `fd`. Descriptors that were already closed have left the set on their own.
    pub fn unregister(&mut self, fd: RawFd) -> Result<(), Fail> {
        if !self.registered.remove(&fd) {
            return Ok(());
        }
        let mut event: epoll_event = epoll_event { events: 0, u64: 0 };
        match unsafe { epoll_ctl(self.epoll_fd, EPOLL_CTL_DEL, fd, &mut event) } {
            0 => Ok(()),
            _ => {
                let e: io::Error = io::Error::last_os_error();
                match e.raw_os_error() {
                    Some(libc::EBADF) | Some(libc::ENOENT) => Ok(()),
                    _ => {
                        warn!("unregister(): failed to unwatch fd {} ({:?})", fd, e);
                        Err(Fail::from(e))
                    },
                }
            },
        }
    }

    /// Waits up to `timeout_ms` milliseconds and returns the descriptors that are readable. An interrupted wait
    /// returns no descriptors.
    pub fn wait(&mut self, timeout_ms: i32) -> Result<Vec<RawFd>, Fail> {
        let mut events: [epoll_event; MAX_EPOLL_EVENTS] = [epoll_event { events: 0, u64: 0 }; MAX_EPOLL_EVENTS];
        let ready: usize = match unsafe {
            epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                MAX_EPOLL_EVENTS as libc::c_int,
                timeout_ms,
            )
        } {
            n if n >= 0 => n as usize,
            _ => {
                let e: io::Error = io::Error::last_os_error();
                if e.raw_os_error() == Some(EINTR) {
                    return Ok(Vec::new());
                }
                error!("wait(): epoll returned an error ({:?})", e);
                return Err(Fail::from(e));
            },
        };
        Ok(events[..ready].iter().map(|event| event.u64 as RawFd).collect())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for EventLoop {
    fn drop(&mut self) {
        if unsafe { libc::close(self.epoll_fd) } != 0 {
            warn!("drop(): failed to close epoll fd {}", self.epoll_fd);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
