/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events from the algorithm thread and fires the handlers registered for them.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Handlers for each kind of event: the default logger (if logging is enabled) followed by at most one
/// user-defined handler.
pub(crate) struct EventHandlers {
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) timeout_vote_handlers: Vec<HandlerPtr<TimeoutVoteEvent>>,
    pub(crate) advance_view_handlers: Vec<HandlerPtr<AdvanceViewEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) receive_timeout_vote_handlers: Vec<HandlerPtr<ReceiveTimeoutVoteEvent>>,
    pub(crate) receive_advance_view_handlers: Vec<HandlerPtr<ReceiveAdvanceViewEvent>>,
    pub(crate) start_view_handlers: Vec<HandlerPtr<StartViewEvent>>,
    pub(crate) view_timeout_handlers: Vec<HandlerPtr<ViewTimeoutEvent>>,
    pub(crate) collect_qc_handlers: Vec<HandlerPtr<CollectQCEvent>>,
    pub(crate) collect_tc_handlers: Vec<HandlerPtr<CollectTCEvent>>,
    pub(crate) prune_votes_handlers: Vec<HandlerPtr<PruneVotesEvent>>,
}

// Push the default logger (if enabled) and the user-defined handler (if any) for one kind of event.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        vote_handler: Option<HandlerPtr<VoteEvent>>,
        timeout_vote_handler: Option<HandlerPtr<TimeoutVoteEvent>>,
        advance_view_handler: Option<HandlerPtr<AdvanceViewEvent>>,
        receive_proposal_handler: Option<HandlerPtr<ReceiveProposalEvent>>,
        receive_vote_handler: Option<HandlerPtr<ReceiveVoteEvent>>,
        receive_timeout_vote_handler: Option<HandlerPtr<ReceiveTimeoutVoteEvent>>,
        receive_advance_view_handler: Option<HandlerPtr<ReceiveAdvanceViewEvent>>,
        start_view_handler: Option<HandlerPtr<StartViewEvent>>,
        view_timeout_handler: Option<HandlerPtr<ViewTimeoutEvent>>,
        collect_qc_handler: Option<HandlerPtr<CollectQCEvent>>,
        collect_tc_handler: Option<HandlerPtr<CollectTCEvent>>,
        prune_votes_handler: Option<HandlerPtr<PruneVotesEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            propose_handlers: handlers(log_events, propose_handler),
            vote_handlers: handlers(log_events, vote_handler),
            timeout_vote_handlers: handlers(log_events, timeout_vote_handler),
            advance_view_handlers: handlers(log_events, advance_view_handler),
            receive_proposal_handlers: handlers(log_events, receive_proposal_handler),
            receive_vote_handlers: handlers(log_events, receive_vote_handler),
            receive_timeout_vote_handlers: handlers(log_events, receive_timeout_vote_handler),
            receive_advance_view_handlers: handlers(log_events, receive_advance_view_handler),
            start_view_handlers: handlers(log_events, start_view_handler),
            view_timeout_handlers: handlers(log_events, view_timeout_handler),
            collect_qc_handlers: handlers(log_events, collect_qc_handler),
            collect_tc_handlers: handlers(log_events, collect_tc_handler),
            prune_votes_handlers: handlers(log_events, prune_votes_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.timeout_vote_handlers.is_empty()
            && self.advance_view_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.receive_timeout_vote_handlers.is_empty()
            && self.receive_advance_view_handlers.is_empty()
            && self.start_view_handlers.is_empty()
            && self.view_timeout_handlers.is_empty()
            && self.collect_qc_handlers.is_empty()
            && self.collect_tc_handlers.is_empty()
            && self.prune_votes_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Vote(vote_event) => self
                .vote_handlers
                .iter()
                .for_each(|handler| handler(&vote_event)),

            Event::TimeoutVote(timeout_vote_event) => self
                .timeout_vote_handlers
                .iter()
                .for_each(|handler| handler(&timeout_vote_event)),

            Event::AdvanceView(advance_view_event) => self
                .advance_view_handlers
                .iter()
                .for_each(|handler| handler(&advance_view_event)),

            Event::ReceiveProposal(receive_proposal_event) => self
                .receive_proposal_handlers
                .iter()
                .for_each(|handler| handler(&receive_proposal_event)),

            Event::ReceiveVote(receive_vote_event) => self
                .receive_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_vote_event)),

            Event::ReceiveTimeoutVote(receive_timeout_vote_event) => self
                .receive_timeout_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_timeout_vote_event)),

            Event::ReceiveAdvanceView(receive_advance_view_event) => self
                .receive_advance_view_handlers
                .iter()
                .for_each(|handler| handler(&receive_advance_view_event)),

            Event::StartView(start_view_event) => self
                .start_view_handlers
                .iter()
                .for_each(|handler| handler(&start_view_event)),

            Event::ViewTimeout(view_timeout_event) => self
                .view_timeout_handlers
                .iter()
                .for_each(|handler| handler(&view_timeout_event)),

            Event::CollectQC(collect_qc_event) => self
                .collect_qc_handlers
                .iter()
                .for_each(|handler| handler(&collect_qc_event)),

            Event::CollectTC(collect_tc_event) => self
                .collect_tc_handlers
                .iter()
                .for_each(|handler| handler(&collect_tc_event)),

            Event::PruneVotes(prune_votes_event) => self
                .prune_votes_handlers
                .iter()
                .for_each(|handler| handler(&prune_votes_event)),
        }
    }
}

/// Start the event bus thread, which fires `event_handlers` for every event received from
/// `event_subscriber` until a shutdown signal is received.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // The algorithm thread has exited; wait for the shutdown signal.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(10)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::data_types::ViewNumber;
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::SystemTime;

    #[test]
    fn user_handlers_are_fired_on_the_event_bus_thread() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let recorder = started.clone();
        let start_view_handler: HandlerPtr<StartViewEvent> =
            Box::new(move |event: &StartViewEvent| recorder.lock().unwrap().push(event.view));

        let event_handlers = EventHandlers::new(
            false,
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            Some(start_view_handler),
            None,
            None,
            None,
            None,
        );
        assert!(!event_handlers.is_empty());

        let (event_publisher, event_subscriber) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);

        let event_publisher = Some(event_publisher);
        for view in 1..=3 {
            Event::StartView(StartViewEvent {
                timestamp: SystemTime::now(),
                view: ViewNumber::new(view),
                timeout: Duration::from_millis(100),
            })
            .publish(&event_publisher);
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while started.lock().unwrap().len() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        shutdown.send(()).unwrap();
        event_bus.join().unwrap();

        assert_eq!(
            *started.lock().unwrap(),
            vec![ViewNumber::new(1), ViewNumber::new(2), ViewNumber::new(3)]
        );
    }

    #[test]
    fn no_handlers_without_logging_or_user_handlers() {
        let event_handlers = EventHandlers::new(
            false, None, None, None, None, None, None, None, None, None, None, None, None, None,
        );
        assert!(event_handlers.is_empty());
    }
}
