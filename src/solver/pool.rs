//! The fixed-size worker pool driving all sampling.
//!
//! A single mutex guards the shared item iterator; everything else a worker
//! touches (edge cache, scratch graph, RNG, partial collection) is owned by
//! that worker. When the iterator runs dry the workers park their partial
//! results under the merge lock and stop; the caller folds the partials
//! into the final collection sequentially.

use parking_lot::Mutex;

/// The workload a thread can get from the shared iterator.
enum WorkLoad<I> {
    /// There is no work left to be done: the worker can stop.
    Complete,
    /// The item to process.
    WorkItem { item: I },
}

fn get_workload<I, T>(source: &Mutex<T>) -> WorkLoad<I>
where
    T: Iterator<Item = I>,
{
    let mut iter = source.lock();
    match iter.next() {
        Some(item) => WorkLoad::WorkItem { item },
        None => WorkLoad::Complete,
    }
}

/// Runs `nb_threads` workers over the shared `items` iterator. Each worker
/// builds its own state with `init(worker_id)` and feeds every item it
/// grabs to `process`; the per-worker states are handed back once all items
/// are drained. Items may be processed in any order.
pub fn run<I, S, T, F, P>(nb_threads: usize, items: T, init: F, process: P) -> Vec<S>
where
    I: Send,
    S: Send,
    T: Iterator<Item = I> + Send,
    F: Fn(usize) -> S + Send + Sync,
    P: Fn(&mut S, I) + Send + Sync,
{
    let nb_threads = nb_threads.max(1);
    let source = Mutex::new(items);
    let partials: Mutex<Vec<(usize, S)>> = Mutex::new(Vec::with_capacity(nb_threads));

    std::thread::scope(|s| {
        for id in 0..nb_threads {
            let source = &source;
            let partials = &partials;
            let init = &init;
            let process = &process;
            s.spawn(move || {
                let mut state = init(id);
                loop {
                    match get_workload(source) {
                        WorkLoad::Complete => break,
                        WorkLoad::WorkItem { item } => process(&mut state, item),
                    }
                }
                partials.lock().push((id, state));
            });
        }
    });

    // hand the partials back in worker order so merges are reproducible
    // under fixed seeds, whatever order the threads finished in
    let mut partials = partials.into_inner();
    partials.sort_by_key(|(id, _)| *id);
    partials.into_iter().map(|(_, state)| state).collect()
}
