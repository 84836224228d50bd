use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spool_core::store::codec;
use spool_core::{
    DurableTaskList, RunOutcome, StoreError, StorePath, StoredTask, TaskError, TaskGroup, TaskQueue,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    queue_demo();
    pool_demo();
    group_demo();
    durable_demo();
}

/// A queue with its own consumer thread: enqueue, wait, graceful close.
fn queue_demo() {
    println!("dedicated-thread queue:");
    let queue = TaskQueue::builder().name("demo").build();

    for i in 1..=3 {
        let signal = queue
            .enqueue(move || println!("  task {i} ran"))
            .expect("queue is open");
        if i == 3 {
            signal.wait();
        }
    }

    // the close marker drains behind anything still pending
    if let Some(done) = queue.request_close_with(|| println!("  all drained")) {
        done.wait();
    }
    println!();
}

/// The same queue type, with its consumer submitted to a tokio runtime.
fn pool_demo() {
    println!("shared-pool queue:");
    let runtime = tokio::runtime::Runtime::new().expect("build runtime");
    let queue = TaskQueue::builder()
        .name("pooled")
        .build_on(runtime.handle());

    queue
        .enqueue(|| println!("  ran on the pool"))
        .expect("queue is open")
        .wait();

    // drain the consumer before the runtime goes away
    if let Some(done) = queue.request_close() {
        done.wait();
    }
    println!();
}

/// Several queues behind integer ids, with recycling and random dispatch.
fn group_demo() {
    println!("task group:");
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dispatched);
    let group = TaskGroup::builder()
        .recycle_ids()
        .on_dispatch(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .build();

    let a = group.add_queue();
    let b = group.add_queue();

    for i in 0..6 {
        group
            .enqueue(move || {
                println!("  task {i}");
                std::thread::sleep(Duration::from_millis(10));
            })
            .expect("group has active queues")
            .wait();
    }

    if let Some(done) = group.close_queue(b).expect("b is active") {
        done.wait();
    }
    let reused = group.add_queue();
    println!("  closed queue {b}, next add_queue got id {reused}");

    group
        .enqueue_to(a, || println!("  direct dispatch"))
        .expect("a is active")
        .wait();

    group.shutdown();
    println!(
        "  dispatched {} tasks in total",
        dispatched.load(Ordering::Relaxed)
    );
    println!();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrintTask {
    name: String,
    message: String,
    fail: bool,
}

impl StoredTask for PrintTask {
    type Id = String;

    fn id(&self) -> String {
        self.name.clone()
    }

    fn run(&self) -> Result<(), TaskError> {
        if self.fail {
            return Err(format!("{} refused to run", self.name).into());
        }
        println!("  [{}] {}", self.name, self.message);
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        codec::encode_json(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        codec::decode_json(bytes)
    }
}

/// A persisted batch that halts on its broken step and resumes after repair.
fn durable_demo() {
    println!("durable task list:");
    let dir = std::env::temp_dir().join("spool-demo");
    let path = StorePath::new(&dir, "batch.list");

    // pick up a list a previous run left behind, if any
    let list = match DurableTaskList::<PrintTask>::load(path.clone()).expect("load list") {
        Some(recovered) => {
            println!("  recovered a saved list at cursor {}", recovered.cursor());
            recovered
        }
        None => DurableTaskList::new(path),
    };

    for (name, message, fail) in [
        ("alpha", "first step", false),
        ("beta", "second step", false),
        ("gamma", "this one breaks", true),
        ("delta", "final step", false),
    ] {
        list.append(PrintTask {
            name: name.to_string(),
            message: message.to_string(),
            fail,
        });
    }

    match list.run().expect("run batch") {
        RunOutcome::Completed => println!("  batch completed"),
        RunOutcome::Halted { index, error } => {
            println!("  batch halted at step {index}: {error}");
            list.remove_at(index);
            println!("  dropped the broken step, resuming");
            match list.run().expect("run batch") {
                RunOutcome::Completed => println!("  batch completed"),
                RunOutcome::Halted { index, error } => {
                    println!("  still halted at step {index}: {error}");
                }
            }
        }
    }

    list.delete().expect("delete list file");
    let _ = list.delete_temporary();
}
