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

//! The dependency-driven job graph.
//!
//! A [`Job`] is a node: a description, its declared predecessor jobs, and an
//! action that runs once every predecessor has completed successfully.
//! [`run_jobs`] executes a set of jobs honoring that order, running
//! independent jobs in parallel across a small thread pool.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use errors::*;

static NEXT_JOB_ID: AtomicUsize = AtomicUsize::new(0);

type Action = Box<Fn(&JobOutputs) -> Result<String> + Send + Sync>;

/// A node in the job graph.
pub struct Job {
    id: usize,
    pub description: String,
    deps: Vec<Arc<Job>>,
    action: Action,
}

impl Job {
    /// Build a job with the given description and predecessor jobs. The
    /// action is only ever invoked after every one of `deps` has completed
    /// successfully, and is invoked at most once.
    pub fn new<S, F>(description: S, deps: Vec<Arc<Job>>, action: F) -> Arc<Job>
    where
        S: Into<String>,
        F: Fn(&JobOutputs) -> Result<String> + Send + Sync + 'static,
    {
        Arc::new(Job {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::SeqCst),
            description: description.into(),
            deps,
            action: Box::new(action),
        })
    }

    /// A job with no action of its own, useful for fanning a single
    /// "finished" point out over several independent predecessors (e.g. the
    /// final executable depending on both the output object and every
    /// extra-file object).
    pub fn barrier<S: Into<String>>(description: S, deps: Vec<Arc<Job>>) -> Arc<Job> {
        Job::new(description, deps, |outputs| {
            Ok(outputs.deps().last().map(|s| s.to_string()).unwrap_or_default())
        })
    }
}

/// View over a running job's already-completed dependency outputs, passed
/// to its action.
pub struct JobOutputs<'a> {
    deps: &'a [Arc<Job>],
    outputs: &'a HashMap<usize, String>,
}

impl<'a> JobOutputs<'a> {
    /// The output of the `i`th declared dependency.
    pub fn dep(&self, i: usize) -> &str {
        &self.outputs[&self.deps[i].id]
    }

    /// The outputs of every declared dependency, in declaration order.
    pub fn deps(&self) -> Vec<&str> {
        self.deps.iter().map(|d| self.outputs[&d.id].as_str()).collect()
    }
}

struct SchedulerState {
    ready: VecDeque<usize>,
    in_flight: usize,
    remaining_deps: HashMap<usize, usize>,
    outputs: HashMap<usize, String>,
    first_error: Option<Error>,
    stopped: bool,
    pending: usize,
}

/// Run every job reachable from `roots`, honoring declared dependency order.
/// Independent jobs may run concurrently across up to `threads` OS threads.
///
/// On the first job failure, no further jobs are dispatched; jobs already
/// running are allowed to finish. The first error encountered is returned.
/// On success, returns every executed job's output keyed by the `Arc<Job>`
/// identity passed in (use [`job_output`] to look one up).
pub fn run_jobs(roots: &[Arc<Job>], threads: usize) -> Result<HashMap<usize, String>> {
    let mut all: HashMap<usize, Arc<Job>> = HashMap::new();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut remaining_deps: HashMap<usize, usize> = HashMap::new();

    let mut stack: Vec<Arc<Job>> = roots.to_vec();
    let mut seen: HashSet<usize> = HashSet::new();
    while let Some(job) = stack.pop() {
        if !seen.insert(job.id) {
            continue;
        }
        remaining_deps.insert(job.id, job.deps.len());
        dependents.entry(job.id).or_insert_with(Vec::new);
        for dep in &job.deps {
            dependents.entry(dep.id).or_insert_with(Vec::new).push(job.id);
            stack.push(dep.clone());
        }
        all.insert(job.id, job);
    }

    let total = all.len();
    let mut ready = VecDeque::new();
    for (&id, &count) in &remaining_deps {
        if count == 0 {
            ready.push_back(id);
        }
    }

    let state = Mutex::new(SchedulerState {
        ready,
        in_flight: 0,
        remaining_deps,
        outputs: HashMap::new(),
        first_error: None,
        stopped: false,
        pending: total,
    });
    let cond = Condvar::new();
    let shared = Arc::new((state, cond));

    let worker_count = threads.max(1);
    let handles: Vec<_> = (0..worker_count)
        .map(|_| {
            let shared = shared.clone();
            let all = all.clone();
            let dependents = dependents.clone();
            thread::spawn(move || worker_loop(shared, all, dependents))
        })
        .collect();

    for h in handles {
        let _ = h.join();
    }

    let mut state = shared.0.lock().unwrap();
    if let Some(err) = state.first_error.take() {
        return Err(err);
    }
    Ok(::std::mem::replace(&mut state.outputs, HashMap::new()))
}

fn worker_loop(
    shared: Arc<(Mutex<SchedulerState>, Condvar)>,
    all: HashMap<usize, Arc<Job>>,
    dependents: HashMap<usize, Vec<usize>>,
) {
    let (ref lock, ref cond) = *shared;
    loop {
        let job_id = {
            let mut state = lock.lock().unwrap();
            loop {
                if let Some(id) = state.ready.pop_front() {
                    state.in_flight += 1;
                    break Some(id);
                }
                if state.pending == 0 || (state.stopped && state.in_flight == 0) {
                    break None;
                }
                state = cond.wait(state).unwrap();
            }
        };
        let job_id = match job_id {
            Some(id) => id,
            None => return,
        };

        let job = all.get(&job_id).expect("job present in graph").clone();
        let dep_outputs: HashMap<usize, String> = {
            let state = lock.lock().unwrap();
            job.deps
                .iter()
                .map(|d| (d.id, state.outputs[&d.id].clone()))
                .collect()
        };
        let outputs_view = JobOutputs {
            deps: &job.deps,
            outputs: &dep_outputs,
        };
        let description = job.description.clone();
        let result: Result<String> =
            (job.action)(&outputs_view).chain_err(|| ErrorKind::JobFailed(description));

        let mut state = lock.lock().unwrap();
        state.in_flight -= 1;
        state.pending -= 1;
        match result {
            Ok(output) => {
                state.outputs.insert(job_id, output);
                if !state.stopped {
                    if let Some(deps) = dependents.get(&job_id) {
                        for &dependent in deps {
                            let remaining = state.remaining_deps.get_mut(&dependent).unwrap();
                            *remaining -= 1;
                            if *remaining == 0 {
                                state.ready.push_back(dependent);
                            }
                        }
                    }
                }
            }
            Err(e) => {
                if state.first_error.is_none() {
                    state.first_error = Some(e);
                }
                state.stopped = true;
            }
        }
        cond.notify_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn independent_jobs_both_run() {
        let a = Job::new("a", vec![], |_| Ok("a-out".to_string()));
        let b = Job::new("b", vec![], |_| Ok("b-out".to_string()));
        let results = run_jobs(&[a.clone(), b.clone()], 4).unwrap();
        assert_eq!(results[&a.id], "a-out");
        assert_eq!(results[&b.id], "b-out");
    }

    #[test]
    fn dependent_runs_after_predecessor_and_sees_its_output() {
        let a = Job::new("a", vec![], |_| Ok("a-out".to_string()));
        let b = Job::new("b", vec![a.clone()], |outputs| Ok(format!("b-saw-{}", outputs.dep(0))));
        let results = run_jobs(&[b.clone()], 4).unwrap();
        assert_eq!(results[&b.id], "b-saw-a-out");
    }

    #[test]
    fn diamond_dependency_runs_shared_predecessor_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let run_count = Arc::new(AtomicUsize::new(0));
        let rc = run_count.clone();
        let base = Job::new("base", vec![], move |_| {
            rc.fetch_add(1, Ordering::SeqCst);
            Ok("base-out".to_string())
        });
        let left = Job::new("left", vec![base.clone()], |o| Ok(format!("left-{}", o.dep(0))));
        let right = Job::new("right", vec![base.clone()], |o| Ok(format!("right-{}", o.dep(0))));
        let top = Job::barrier("top", vec![left.clone(), right.clone()]);
        let results = run_jobs(&[top.clone()], 4).unwrap();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(results[&left.id], "left-base-out");
        assert_eq!(results[&right.id], "right-base-out");
    }

    #[test]
    fn first_failure_stops_further_scheduling() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let c_ran = Arc::new(AtomicBool::new(false));
        let c_ran2 = c_ran.clone();
        let failing = Job::new("failing", vec![], |_| bail!("boom"));
        let c = Job::new("c", vec![failing.clone()], move |_| {
            c_ran2.store(true, Ordering::SeqCst);
            Ok("c-out".to_string())
        });
        let result = run_jobs(&[c.clone()], 4);
        assert!(result.is_err());
        assert!(!c_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn unrelated_job_still_completes_after_a_sibling_fails() {
        let failing = Job::new("failing", vec![], |_| bail!("boom"));
        let ok = Job::new("ok", vec![], |_| Ok("ok-out".to_string()));
        let result = run_jobs(&[failing, ok], 4);
        assert!(result.is_err());
    }
}
