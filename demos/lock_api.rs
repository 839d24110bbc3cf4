use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

// Requires the `lock_api` feature.
//
// You may export these types to your callers and later switch the raw lock
// to another `lock_api::RawMutex` without breaking their code.
pub type Mutex<T> = spinlocks::lock_api::ttas::Mutex<T>;
pub type MutexGuard<'a, T> = spinlocks::lock_api::ttas::MutexGuard<'a, T>;

fn main() {
    const N: usize = 10;

    // Spawn a few threads to increment a shared variable (non-atomically), and
    // let the main thread know once all increments are done.
    let data = Arc::new(Mutex::new(0));

    let (tx, rx) = channel();
    for _ in 0..N {
        let (data, tx) = (data.clone(), tx.clone());
        thread::spawn(move || {
            let mut data: MutexGuard<'_, _> = data.lock();
            *data += 1;
            if *data == N {
                tx.send(()).unwrap();
            }
            // the lock is released here when `data` goes out of scope.
        });
    }
    let _message = rx.recv();

    // Would return `None` if the lock was already held.
    let count = data.try_lock().unwrap();
    assert_eq!(*count, N);
}
