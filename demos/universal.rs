use std::sync::Arc;
use std::thread;

use spinlocks::universal::{Universal, WfUniversalBack};

// A bounded history shared by four threads through the wait-free universal
// construction. Each thread gets back the history as it was right after its
// own entry was recorded.
fn main() {
    const THREADS: usize = 4;
    const ENTRIES: usize = 5;

    let history = Arc::new(WfUniversalBack::new(THREADS, Vec::new).expect("non-zero thread count"));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let history = Arc::clone(&history);
            thread::spawn(move || {
                for i in 0..ENTRIES {
                    let entry = format!("t{t}#{i}");
                    let seen = history.apply(move |log: &mut Vec<String>| log.push(entry.clone()));
                    println!("t{t} sees {} entries, last {:?}", seen.len(), seen.last());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
