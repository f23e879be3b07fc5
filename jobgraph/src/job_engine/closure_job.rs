// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::job_engine::job::JobEntry;

/// A job body made of a closure and the argument it was registered with.
///
/// The argument is owned by the job and handed to the closure by reference
/// on every iteration.
pub struct ClosureJob<A> {
    desc: String,
    arg: A,
    f: Box<dyn Fn(&A) + Send + Sync + 'static>,
}

impl<A> ClosureJob<A>
where
    A: Send + Sync + 'static,
{
    pub fn new<F>(desc: impl Into<String>, f: F, arg: A) -> Self
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        Self {
            desc: desc.into(),
            arg,
            f: Box::new(f),
        }
    }

    pub fn arg(&self) -> &A {
        &self.arg
    }
}

impl ClosureJob<()> {
    /// A job whose closure needs no bound argument.
    pub fn from_fn<F>(desc: impl Into<String>, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(desc, move |_: &()| f(), ())
    }
}

impl<A> JobEntry for ClosureJob<A>
where
    A: Send + Sync + 'static,
{
    fn desc(&self) -> &str {
        &self.desc
    }

    fn run(&self) {
        (self.f)(&self.arg)
    }
}
