// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Backend process management with orphan protection.
//!
//! A spawned backend must never outlive the gateway: on Linux the child gets
//! `PR_SET_PDEATHSIG`, on Windows it is placed in a kill-on-close Job Object,
//! and everywhere the supervisor kills it when dropped.

use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::models::LaunchSpec;
use crate::mcp::pipeline::UpstreamEvent;
use std::process::Stdio;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[cfg(windows)]
use win32job::Job;

pub struct ProcessSupervisor {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    // Keep job object alive (Windows only)
    #[cfg(windows)]
    _job: Option<Job>,
}

pub struct SpawnedProcess {
    pub supervisor: ProcessSupervisor,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
}

fn spawn_error(adapter: &str, what: impl std::fmt::Display) -> GatewayError {
    GatewayError::backend_unavailable(adapter, what.to_string())
}

impl ProcessSupervisor {
    /// Spawn `spec` with piped stdio. Exit is reported as
    /// [`UpstreamEvent::Terminated`] on `tx_events`.
    pub fn spawn(
        adapter: &str,
        spec: &LaunchSpec,
        tx_events: mpsc::Sender<UpstreamEvent>,
    ) -> Result<SpawnedProcess, GatewayError> {
        debug!(
            adapter = %adapter,
            command = %spec.command,
            args = ?spec.args,
            "ProcessSupervisor: spawning backend"
        );

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "linux")]
        // SAFETY: prctl(PR_SET_PDEATHSIG) is async-signal-safe and only touches
        // the calling (child) process between fork and exec.
        unsafe {
            command.pre_exec(|| {
                let ret = libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
                if ret != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        #[cfg(windows)]
        let job = {
            let job = Job::create()
                .map_err(|e| spawn_error(adapter, format!("failed to create Job Object: {e}")))?;
            let mut info = job
                .query_extended_limit_info()
                .map_err(|e| spawn_error(adapter, format!("failed to query job info: {e}")))?;
            info.limit_kill_on_job_close();
            job.set_extended_limit_info(&info)
                .map_err(|e| spawn_error(adapter, format!("failed to set job limits: {e}")))?;
            Some(job)
        };

        let mut child = command.spawn().map_err(|e| {
            spawn_error(adapter, format!("failed to spawn '{}': {e}", spec.command))
        })?;

        #[cfg(windows)]
        if let Some(ref job) = job {
            if let Some(handle) = child.raw_handle() {
                job.assign_process(handle as isize).map_err(|e| {
                    spawn_error(adapter, format!("failed to assign process to Job Object: {e}"))
                })?;
            }
        }

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(adapter, "backend stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(adapter, "backend stdout not captured"))?;
        let stderr = child.stderr.take();

        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(async move {
            let code = tokio::select! {
                _ = kill_rx => {
                    let _ = child.kill().await;
                    child.wait().await.ok().and_then(|s| s.code())
                }
                status = child.wait() => status.ok().and_then(|s| s.code()),
            };
            let _ = tx_events.send(UpstreamEvent::Terminated(code)).await;
        });

        Ok(SpawnedProcess {
            supervisor: Self {
                pid,
                kill_tx: Some(kill_tx),
                #[cfg(windows)]
                _job: job,
            },
            stdin,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.kill();
    }
}
