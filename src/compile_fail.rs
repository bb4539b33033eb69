//! Contains a set of compile failure doctests.

// -----------------------------------------------------------------------------
// Ensures non-send data cannot be moved into a spawned task.

/** ```compile_fail,E0277

use std::rc::Rc;
use weft::Worker;

fn bad_spawn(worker: &Worker) {
    let r = Rc::new(22);
    let task = worker.spawn(move |_: &Worker| r.clone()); //~ ERROR
    worker.sync(task);
}

fn main() { }

``` */
mod nonsend_spawn {}

// -----------------------------------------------------------------------------
// Ensures non-send data cannot be returned by join.

/** ```compile_fail,E0277

use std::rc::Rc;
use weft::Worker;

fn bad_join(worker: &Worker) {
    worker.join(|_| Rc::new(22), |_| ()); //~ ERROR
}

fn main() { }

``` */
mod nonsend_left_join {}

/** ```compile_fail,E0277

use std::rc::Rc;
use weft::Worker;

fn bad_join(worker: &Worker) {
    worker.join(|_| (), |_| Rc::new(23)); //~ ERROR
}

fn main() { }

``` */
mod nonsend_right_join {}

// -----------------------------------------------------------------------------
// Ensures spawned tasks cannot borrow from the enclosing scope. (Borrows
// belong in `join`, which retires its tasks before returning.)

/** ```compile_fail,E0373

use weft::Worker;

fn bad_spawn<F>(worker: &Worker, f: F)
    where F: Fn(&i32) + Send + 'static,
{
    let x = 22;
    let task = worker.spawn(|_: &Worker| f(&x)); //~ ERROR `x` does not live long enough
    worker.sync(task);
}

fn main() { }

``` */
mod spawn_borrows_local {}

// -----------------------------------------------------------------------------
// Ensures a worker handle cannot be smuggled into a task; tasks must use
// the worker they are handed, which is the one actually running them.

/** ```compile_fail,E0277

use weft::Worker;

fn smuggled_worker(worker: &Worker) {
    worker.join(
        |_| (),
        move |_| {
            let _ = worker.index(); //~ ERROR
        },
    );
}

fn main() { }

``` */
mod worker_is_not_shared {}

// -----------------------------------------------------------------------------
// Ensures the two branches of a join cannot mutably borrow the same data.

/** ```compile_fail,E0524

use weft::Worker;

fn quick_sort<T: PartialOrd + Send>(worker: &Worker, v: &mut [T]) {
    if v.len() <= 1 {
        return;
    }

    let mid = partition(v);
    let (lo, _hi) = v.split_at_mut(mid);
    worker.join(|w| quick_sort(w, lo), |w| quick_sort(w, lo)); //~ ERROR
}

fn partition<T: PartialOrd + Send>(v: &mut [T]) -> usize {
    let pivot = v.len() - 1;
    let mut i = 0;
    for j in 0..pivot {
        if v[j] <= v[pivot] {
            v.swap(i, j);
            i += 1;
        }
    }
    v.swap(i, pivot);
    i
}

fn main() { }

``` */
mod quicksort_race_1 {}

/** ```compile_fail,E0500

use weft::Worker;

fn quick_sort<T: PartialOrd + Send>(worker: &Worker, v: &mut [T]) {
    if v.len() <= 1 {
        return;
    }

    let mid = partition(v);
    let (lo, _hi) = v.split_at_mut(mid);
    worker.join(|w| quick_sort(w, lo), |w| quick_sort(w, v)); //~ ERROR
}

fn partition<T: PartialOrd + Send>(v: &mut [T]) -> usize {
    let pivot = v.len() - 1;
    let mut i = 0;
    for j in 0..pivot {
        if v[j] <= v[pivot] {
            v.swap(i, j);
            i += 1;
        }
    }
    v.swap(i, pivot);
    i
}

fn main() { }

``` */
mod quicksort_race_2 {}

/** ```compile_fail,E0524

use weft::Worker;

fn quick_sort<T: PartialOrd + Send>(worker: &Worker, v: &mut [T]) {
    if v.len() <= 1 {
        return;
    }

    let mid = partition(v);
    let (_lo, hi) = v.split_at_mut(mid);
    worker.join(|w| quick_sort(w, hi), |w| quick_sort(w, hi)); //~ ERROR
}

fn partition<T: PartialOrd + Send>(v: &mut [T]) -> usize {
    let pivot = v.len() - 1;
    let mut i = 0;
    for j in 0..pivot {
        if v[j] <= v[pivot] {
            v.swap(i, j);
            i += 1;
        }
    }
    v.swap(i, pivot);
    i
}

fn main() { }

``` */
mod quicksort_race_3 {}
