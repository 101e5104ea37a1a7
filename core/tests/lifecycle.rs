//! Lifecycle guarantees under concurrent firing and registration.
//!
//! # Design
//! Every handler reports into a crossbeam channel; `SerialQueue::sync` drains
//! the queue before asserting, so tests never rely on sleeps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use tracing_test::traced_test;
use transport_core::{
    CompletionHandler, GroupQueue, ProgressHandler, SerialQueue, TaskCreatedHandler,
    TransportRequest, TransportResponse,
};

fn queue(name: &str) -> (SerialQueue, Arc<dyn GroupQueue>) {
    let queue = SerialQueue::new(name).unwrap();
    let shared: Arc<dyn GroupQueue> = Arc::new(queue.clone());
    (queue, shared)
}

fn response(status: u16) -> TransportResponse {
    TransportResponse::new(status, Vec::new(), format!("{{\"status\":{status}}}"))
}

#[test]
fn racing_completions_deliver_exactly_one_response() {
    let (queue, shared) = queue("race");
    let (tx, rx) = channel::unbounded();
    let request = Arc::new(TransportRequest::get("/conversations").unwrap());
    request.add_completion_handler(CompletionHandler::on_group_queue(shared, move |r| {
        tx.send(r.status).unwrap()
    }));

    let barrier = Arc::new(Barrier::new(8));
    let winners = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..8u16)
        .map(|i| {
            let request = Arc::clone(&request);
            let barrier = Arc::clone(&barrier);
            let winners = Arc::clone(&winners);
            thread::spawn(move || {
                barrier.wait();
                if request.fire_completion(response(200 + i)) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    queue.sync();

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    let delivered: Vec<u16> = rx.try_iter().collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(Some(delivered[0]), request.response().map(|r| r.status));
}

#[test]
fn second_completion_is_never_delivered() {
    let (queue, shared) = queue("twice");
    let (tx, rx) = channel::unbounded();
    let request = TransportRequest::get("/conversations").unwrap();
    for _ in 0..3 {
        let tx = tx.clone();
        request.add_completion_handler(CompletionHandler::on_group_queue(
            Arc::clone(&shared),
            move |r| tx.send(r.status).unwrap(),
        ));
    }
    request.fire_completion(response(200));
    request.fire_completion(response(503));
    queue.sync();
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![200, 200, 200]);
}

#[test]
fn late_completion_handler_receives_retained_response_once() {
    let (queue, shared) = queue("late");
    let (tx, rx) = channel::unbounded();
    let request = TransportRequest::get("/conversations").unwrap();
    request.fire_completion(response(201));
    request.add_completion_handler(CompletionHandler::on_group_queue(shared, move |r| {
        tx.send(r).unwrap()
    }));
    queue.sync();
    let delivered: Vec<_> = rx.try_iter().collect();
    assert_eq!(delivered, vec![response(201)]);
}

#[test]
fn registration_racing_completion_never_drops_a_handler() {
    let (queue, shared) = queue("register-race");
    let delivered = Arc::new(AtomicUsize::new(0));
    let request = Arc::new(TransportRequest::get("/conversations").unwrap());

    let registrar = {
        let request = Arc::clone(&request);
        let delivered = Arc::clone(&delivered);
        thread::spawn(move || {
            for _ in 0..200 {
                let delivered = Arc::clone(&delivered);
                request.add_completion_handler(CompletionHandler::on_group_queue(
                    Arc::clone(&shared),
                    move |_| {
                        delivered.fetch_add(1, Ordering::SeqCst);
                    },
                ));
            }
        })
    };
    let completer = {
        let request = Arc::clone(&request);
        thread::spawn(move || {
            request.fire_completion(response(200));
        })
    };
    registrar.join().unwrap();
    completer.join().unwrap();
    queue.sync();
    assert_eq!(delivered.load(Ordering::SeqCst), 200);
}

#[test]
fn progress_values_arrive_in_call_order() {
    let (queue, shared) = queue("progress");
    let (tx, rx) = channel::unbounded();
    let request = TransportRequest::get("/assets/1").unwrap();
    request.add_progress_handler(ProgressHandler::on_group_queue(shared, move |p| {
        tx.send(p).unwrap()
    }));
    let values: Vec<f32> = (0..=100).map(|i| i as f32 / 100.0).collect();
    for value in &values {
        request.fire_progress(*value);
    }
    queue.sync();
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), values);
}

#[test]
fn out_of_range_progress_is_delivered_as_is() {
    let (queue, shared) = queue("range");
    let (tx, rx) = channel::unbounded();
    let request = TransportRequest::get("/assets/1").unwrap();
    request.add_progress_handler(ProgressHandler::on_group_queue(shared, move |p| {
        tx.send(p).unwrap()
    }));
    request.fire_progress(1.5);
    request.fire_progress(-0.1);
    queue.sync();
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1.5, -0.1]);
}

#[test]
fn events_reach_one_queue_in_lifecycle_order() {
    let (queue, shared) = queue("ordering");
    let (tx, rx) = channel::unbounded::<String>();
    let request = TransportRequest::get("/conversations").unwrap();

    let created = tx.clone();
    request.add_task_created_handler(TaskCreatedHandler::on_group_queue(
        Arc::clone(&shared),
        move |task| created.send(format!("created {}", task.identifier)).unwrap(),
    ));
    let progressed = tx.clone();
    request.add_progress_handler(ProgressHandler::on_group_queue(
        Arc::clone(&shared),
        move |p| progressed.send(format!("progress {p}")).unwrap(),
    ));
    request.add_completion_handler(CompletionHandler::on_group_queue(shared, move |r| {
        tx.send(format!("completed {}", r.status)).unwrap()
    }));

    request.fire_creation(3, "foreground").unwrap();
    request.fire_progress(0.5);
    request.fire_progress(1.0);
    request.fire_completion(response(200));
    queue.sync();

    assert_eq!(
        rx.try_iter().collect::<Vec<_>>(),
        vec!["created 3", "progress 0.5", "progress 1", "completed 200"]
    );
}

#[test]
fn handlers_run_on_their_own_queues() {
    let (first, first_shared) = queue("first-queue");
    let (second, second_shared) = queue("second-queue");
    let (tx, rx) = channel::unbounded();
    let request = TransportRequest::get("/conversations").unwrap();
    for shared in [first_shared, second_shared] {
        let tx = tx.clone();
        request.add_completion_handler(CompletionHandler::on_group_queue(shared, move |_| {
            tx.send(thread::current().name().map(str::to_string)).unwrap()
        }));
    }
    request.fire_completion(response(200));
    first.sync();
    second.sync();
    let mut names: Vec<_> = rx.try_iter().flatten().collect();
    names.sort();
    assert_eq!(names, vec!["first-queue", "second-queue"]);
}

#[test]
fn slow_handler_does_not_block_firing_thread() {
    let (queue, shared) = queue("slow");
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let (done_tx, done_rx) = channel::bounded(1);
    let request = TransportRequest::get("/conversations").unwrap();
    request.add_completion_handler(CompletionHandler::on_group_queue(shared, move |_| {
        release_rx.recv().unwrap();
        done_tx.send(()).unwrap();
    }));

    // Returns while the handler is still parked on `release_rx`.
    assert!(request.fire_completion(response(200)));
    assert!(request.is_completed());
    assert!(done_rx.try_recv().is_err());

    release_tx.send(()).unwrap();
    done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    queue.sync();
}

#[test]
fn handler_may_inspect_its_request() {
    let (queue, shared) = queue("reentrant");
    let (tx, rx) = channel::bounded(1);
    let request = Arc::new(TransportRequest::get("/conversations").unwrap());
    let inner = Arc::clone(&request);
    request.add_completion_handler(CompletionHandler::on_group_queue(shared, move |_| {
        tx.send(inner.is_completed()).unwrap()
    }));
    request.fire_completion(response(200));
    queue.sync();
    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
}

#[traced_test]
#[test]
fn double_creation_is_reported() {
    let request = TransportRequest::get("/conversations").unwrap();
    request.fire_creation(1, "foreground").unwrap();
    assert!(request.fire_creation(1, "foreground").is_err());
    assert!(logs_contain("task creation fired twice"));
}

#[traced_test]
#[test]
fn affinity_conflict_is_logged() {
    let request = TransportRequest::get("/calls").unwrap();
    request.force_to_voip_session().unwrap();
    assert!(request.force_to_background_session().is_err());
    assert!(request.should_use_voip_session());
    assert!(logs_contain("session affinity conflict"));
}
