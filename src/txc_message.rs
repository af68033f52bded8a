// Message factory
//
// Generated messages get sequence ids 1, 2, 3, ... per node. The counter only
// moves when a message is generated, so dropped arrivals never leave gaps.

use crate::txc_interface::{Address, Message, SeqId};

pub struct MessageFactory {
    source: Address,
    destination: Address,
    seq: SeqId,
}

impl MessageFactory {
    pub fn new(source: Address, destination: Address) -> Self {
        Self {
            source,
            destination,
            seq: 0,
        }
    }

    /// Build the next message, `seq = counter + 1`, timestamps unset.
    pub fn generate(&mut self) -> Message {
        self.seq += 1;
        Message::new(self.seq, self.source, self.destination)
    }

    /// Number of messages generated so far
    pub fn sequence_counter(&self) -> SeqId {
        self.seq
    }

    pub fn source(&self) -> Address {
        self.source
    }

    pub fn destination(&self) -> Address {
        self.destination
    }
}
