//! The fragmenter (server side): splits an oversize reply into a sequence of
//! ≤512-byte DNS messages, each tagged with a `FRAGMENT_CODE` descriptor,
//! using greedy linear packing across the answer/authority/additional
//! sections in order.

use std::collections::VecDeque;

use crate::dns::{Message, ResourceRecord};
use crate::error::FragError;
use crate::signal::FRAGMENT_CODE;

/// Hard per-fragment size cap.
const MAX_FRAGMENT_SIZE: usize = 512;

/// Sequence/total fields are single octets, so a reply cannot be split into
/// more than this many fragments.
const MAX_FRAGMENTS: usize = 255;

#[derive(Clone, Copy)]
enum Section {
    Answer,
    Authority,
    Additional,
}

/// Split `reply` into one or more self-contained DNS messages. `reply` must
/// carry an OPT record; callers that receive `Err(FragError::MissingOpt)`
/// should fall back to forwarding `reply` unfragmented.
pub fn fragment(reply: &Message) -> Result<Vec<Message>, FragError> {
    let opt = reply.opt().ok_or(FragError::MissingOpt)?;

    let mut qa: VecDeque<ResourceRecord> = reply.answer.iter().cloned().collect();
    let mut qn: VecDeque<ResourceRecord> = reply.authority.iter().cloned().collect();
    let mut qe: VecDeque<ResourceRecord> = reply
        .additional
        .iter()
        .filter(|rr| !rr.is_opt())
        .cloned()
        .collect();

    let mut fragments = Vec::new();

    while !qa.is_empty() || !qn.is_empty() || !qe.is_empty() {
        let mut frag = Message::new(reply.header);
        frag.question = reply.question.clone();

        let mut frag_opt = opt.clone();
        frag_opt.options.push(crate::dns::EdnsOption {
            code: FRAGMENT_CODE,
            data: vec![0, 0],
        });
        frag.set_opt(&frag_opt);

        let mut progressed = false;
        progressed |= fill_from(&mut qa, &mut frag, Section::Answer);
        progressed |= fill_from(&mut qn, &mut frag, Section::Authority);
        progressed |= fill_from(&mut qe, &mut frag, Section::Additional);

        if !progressed {
            // The next RR alone (with header + OPT) exceeds 512 octets.
            return Ok(vec![single_rr_overflow(reply)]);
        }

        fragments.push(frag);
    }

    if fragments.len() > MAX_FRAGMENTS {
        return Ok(vec![single_rr_overflow(reply)]);
    }

    let total = fragments.len() as u8;
    for (i, frag) in fragments.iter_mut().enumerate() {
        let mut frag_opt = frag.opt().expect("fragment always carries an OPT record");
        for option in &mut frag_opt.options {
            if option.code == FRAGMENT_CODE {
                option.data = vec![total, i as u8];
            }
        }
        frag.set_opt(&frag_opt);
    }

    Ok(fragments)
}

/// Pop RRs from `queue` into `frag`'s `section`, one at a time, until either
/// the queue is empty or the next RR would push `frag` past 512 octets (in
/// which case it's pushed back to the queue's head and filling stops).
/// Returns whether any RR was kept.
fn fill_from(queue: &mut VecDeque<ResourceRecord>, frag: &mut Message, section: Section) -> bool {
    let mut progressed = false;
    while let Some(rr) = queue.pop_front() {
        push(frag, section, rr.clone());
        if frag.encoded_len() <= MAX_FRAGMENT_SIZE {
            progressed = true;
        } else {
            pop(frag, section);
            queue.push_front(rr);
            break;
        }
    }
    progressed
}

fn push(frag: &mut Message, section: Section, rr: ResourceRecord) {
    match section {
        Section::Answer => frag.answer.push(rr),
        Section::Authority => frag.authority.push(rr),
        Section::Additional => frag.additional.push(rr),
    }
}

fn pop(frag: &mut Message, section: Section) {
    match section {
        Section::Answer => frag.answer.pop(),
        Section::Authority => frag.authority.pop(),
        Section::Additional => frag.additional.pop(),
    };
}

/// A single TC-flagged, empty-bodied reply — used both for the single-RR
/// overflow case and the >255-fragments overflow case.
fn single_rr_overflow(reply: &Message) -> Message {
    let mut msg = Message::new(reply.header);
    msg.question = reply.question.clone();
    msg.truncate_empty();
    msg
}
