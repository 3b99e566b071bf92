// Byte ring buffer. `head` is the write position, `tail` the read position.
// One slot is always left empty so that head == tail means empty.
use std::io;

pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl RingBuffer {
    /// Create a ring holding at most `capacity - 1` bytes.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            buf: vec![0u8; capacity.max(2)].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Bytes waiting to be drained
    pub fn len(&self) -> usize {
        (self.head + self.buf.len() - self.tail) % self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) % self.buf.len() == self.tail
    }

    /// Free space at this moment
    pub fn free(&self) -> usize {
        self.buf.len() - 1 - self.len()
    }

    /// Copy as much of `data` as fits, in at most two passes (head to end, then start to tail - 1).
    /// Returns the number of bytes accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let cap = self.buf.len();
        let mut written = 0;

        for _ in 0..2 {
            let end = if self.head >= self.tail {
                // Slot before tail stays empty, so when tail == 0 the last slot is reserved
                if self.tail == 0 { cap - 1 } else { cap }
            } else {
                self.tail - 1
            };
            let room = end - self.head;
            let n = room.min(data.len() - written);
            if n == 0 {
                break;
            }
            self.buf[self.head..self.head + n].copy_from_slice(&data[written..written + n]);
            self.head = (self.head + n) % cap;
            written += n;
        }
        written
    }

    /// Contiguous readable runs, oldest first. The second is empty unless the data wraps.
    pub fn readable(&self) -> (&[u8], &[u8]) {
        if self.head >= self.tail {
            (&self.buf[self.tail..self.head], &[])
        } else {
            (&self.buf[self.tail..], &self.buf[..self.head])
        }
    }

    /// Mark `n` bytes as drained. Indices reset to zero once the ring is empty.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len());
        self.tail = (self.tail + n) % self.buf.len();
        if self.tail == self.head {
            self.tail = 0;
            self.head = 0;
        }
    }

    /// Drain up to two contiguous runs through `send`. `send` returns how much it took;
    /// a short count stops the drain and the rest stays queued for the next call.
    pub fn drain_with<F>(&mut self, mut send: F) -> io::Result<usize>
    where
        F: FnMut(&[u8]) -> io::Result<usize>,
    {
        let mut total = 0;
        for _ in 0..2 {
            let (first, _) = self.readable();
            let run_len = first.len();
            if run_len == 0 {
                break;
            }
            let n = send(first)?.min(run_len);
            if n == 0 {
                break;
            }
            self.consume(n);
            total += n;
            if n < run_len {
                break;
            }
        }
        Ok(total)
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}
