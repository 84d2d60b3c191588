//! Launcher of a troupe process group: `troupe-launch <n> <prog> [args...]`
//! wires one unidirectional pipe per ordered pair of ranks at the
//! deterministic descriptors the library expects, spawns `n` copies of
//! `prog` that each keep only their own endpoints, publishes the group
//! size and the pid-keyed ranks through the environment, and exits zero
//! once every member has been reaped.

use std::{
    ffi::CString,
    io::{Error, ErrorKind},
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    os::unix::process::CommandExt,
    process::{Child, Command, exit},
};
use troupe::{
    channel::{SIZE_ENV, link_descriptor, rank_env},
    world::Rank,
};

fn main() {
    let mut args = std::env::args().skip(1);
    let (Some(count), Some(program)) = (args.next(), args.next()) else {
        usage();
    };
    let Ok(size) = count.parse::<usize>() else {
        usage();
    };
    if size == 0 {
        usage();
    }
    let arguments = args.collect::<Vec<_>>();

    // The whole mesh must exist before the first spawn so every member
    // inherits it and can drop the endpoints that are not its own.
    let mesh = build_mesh(size);

    let members = (0..size)
        .map(|rank| spawn_member(&program, &arguments, size, rank))
        .collect::<Vec<Child>>();
    drop(mesh);

    for mut member in members {
        match member.wait() {
            Ok(status) if !status.success() => {
                eprintln!("troupe-launch: member exited with {status}");
            }
            Ok(_) => {}
            Err(err) => fail(&format!("failed to reap a member: {err}")),
        }
    }
}

fn usage() -> ! {
    eprintln!("Usage: troupe-launch <n> <prog> [args...]");
    exit(1);
}

fn fail(message: &str) -> ! {
    eprintln!("troupe-launch: {message}");
    exit(1);
}

/// Creates the pipes of every ordered pair and parks their ends at the
/// descriptors of [`link_descriptor`]: read end at the even slot, write
/// end at the odd one.
fn build_mesh(size: usize) -> Vec<OwnedFd> {
    let mut mesh = Vec::with_capacity(size * (size - 1) * 2);
    for receiver in 0..size {
        for sender in 0..size {
            if receiver == sender {
                continue;
            }
            let (reader, writer) = std::io::pipe()
                .unwrap_or_else(|err| fail(&format!("failed to create a channel: {err}")));
            let slot = link_descriptor(size, Rank::new(receiver), Rank::new(sender));
            mesh.push(park(reader.into(), slot));
            mesh.push(park(writer.into(), slot + 1));
        }
    }
    mesh
}

/// Moves `fd` to the `target` descriptor. The duplicate deliberately has
/// no close-on-exec flag, so the members inherit it through `exec`.
fn park(fd: OwnedFd, target: RawFd) -> OwnedFd {
    if unsafe { libc::dup2(fd.as_raw_fd(), target) } == -1 {
        fail(&format!(
            "failed to park a channel end at descriptor {target}: {}",
            Error::last_os_error()
        ));
    }
    unsafe { OwnedFd::from_raw_fd(target) }
}

fn spawn_member(program: &str, arguments: &[String], size: usize, rank: usize) -> Child {
    let mut command = Command::new(program);
    command.args(arguments).env(SIZE_ENV, size.to_string());
    unsafe {
        command.pre_exec(move || claim_membership(size, rank));
    }
    command
        .spawn()
        .unwrap_or_else(|err| fail(&format!("failed to spawn member {rank}: {err}")))
}

/// Runs in the member between fork and exec: keeps only this member's
/// endpoints of the inherited mesh and publishes its pid-keyed rank.
fn claim_membership(size: usize, rank: usize) -> std::io::Result<()> {
    for receiver in 0..size {
        for sender in 0..size {
            if receiver == sender {
                continue;
            }
            let slot = link_descriptor(size, Rank::new(receiver), Rank::new(sender));
            if receiver != rank {
                unsafe { libc::close(slot) };
            }
            if sender != rank {
                unsafe { libc::close(slot + 1) };
            }
        }
    }
    // The rank variable is keyed by pid, which exists only now.
    let pid = unsafe { libc::getpid() } as u32;
    let key = CString::new(rank_env(pid))
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "rank variable name"))?;
    let value = CString::new(rank.to_string())
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "rank variable value"))?;
    if unsafe { libc::setenv(key.as_ptr(), value.as_ptr(), 0) } != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}
