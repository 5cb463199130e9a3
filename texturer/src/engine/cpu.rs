use std::sync::atomic::AtomicU32;
use std::sync::mpsc::{self, Receiver};
use std::time::Instant;

use base::defs::{Error, ErrorKind::*, Result};
use rayon::prelude::*;

use crate::engine::{
    ComputeBackend, DispatchInput, DispatchOutput, PendingDispatch, Permit,
};

// Runs the kernel on the rayon thread pool, one task per face.
pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn submit(
        &self,
        input: DispatchInput,
        permit: Permit,
    ) -> Result<Box<dyn PendingDispatch>> {
        let (sender, receiver) = mpsc::channel();
        let submitted = Instant::now();
        rayon::spawn(move || {
            let output = run_kernel(&input, submitted);
            drop(permit);
            let _ = sender.send(output);
        });
        Ok(Box::new(CpuPending { receiver }))
    }
}

struct CpuPending {
    receiver: Receiver<DispatchOutput>,
}

impl PendingDispatch for CpuPending {
    fn wait(self: Box<Self>) -> Result<DispatchOutput> {
        self.receiver.recv().map_err(|_| {
            Error::new(
                DispatchFailure,
                "compute task ended without result".to_string(),
            )
        })
    }
}

fn run_kernel(input: &DispatchInput, submitted: Instant) -> DispatchOutput {
    let buffers = input.kernel_buffers();
    let counters: Vec<AtomicU32> = (0..input.uniforms.counter_count())
        .map(|_| AtomicU32::new(0))
        .collect();

    let corners = (0..input.uniforms.face_count as usize)
        .into_par_iter()
        .flat_map_iter(|face| buffers.assign_face(face, &counters))
        .collect();

    DispatchOutput {
        corners,
        counters: counters.into_iter().map(AtomicU32::into_inner).collect(),
        elapsed: submitted.elapsed(),
    }
}
