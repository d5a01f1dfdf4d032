use messaging::QueueDef;

/// Exchange and queues of the book search pipeline.
pub struct BooksQueue;

impl QueueDef for BooksQueue {
    const EXCHANGE: &'static str = "books_exchange";
    const WORK_QUEUE: &'static str = "book.queue";
    const DEAD_LETTER_QUEUE: &'static str = "book.queue.dlq";
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::Topology;

    #[test]
    fn test_topology() {
        let topology = Topology::from_def::<BooksQueue>();

        assert_eq!(topology.exchange, "books_exchange");
        assert_eq!(topology.routing_key(), "book.queue");
        assert_eq!(topology.dead_letter_queue, "book.queue.dlq");
        assert_eq!(topology.prefetch, 10);
    }
}
