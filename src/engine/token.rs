use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Timeout,
    Poisoned,
}

/// Exclusive right to mutate one value, acquired with a bounded wait.
///
/// The gate flag is only held for the instant of taking or returning the
/// token, so waiters can give up on their deadline instead of queueing on
/// the value mutex indefinitely.
#[derive(Debug)]
pub struct OwnershipToken<T> {
    held: Mutex<bool>,
    released: Condvar,
    value: Mutex<T>,
}

impl<T> OwnershipToken<T> {
    pub fn new(value: T) -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
            value: Mutex::new(value),
        }
    }

    pub fn with<R>(&self, timeout: Duration, f: impl FnOnce(&mut T) -> R) -> Result<R, TokenError> {
        let _token = self.acquire(timeout)?;
        let mut value = self.value.lock().map_err(|_| TokenError::Poisoned)?;
        Ok(f(&mut value))
    }

    fn acquire(&self, timeout: Duration) -> Result<TokenGuard<'_, T>, TokenError> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| TokenError::Poisoned)?;

        while *held {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TokenError::Timeout);
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, remaining)
                .map_err(|_| TokenError::Poisoned)?;
            held = guard;
        }

        *held = true;
        Ok(TokenGuard { owner: self })
    }
}

struct TokenGuard<'a, T> {
    owner: &'a OwnershipToken<T>,
}

impl<T> Drop for TokenGuard<'_, T> {
    fn drop(&mut self) {
        let mut held = match self.owner.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *held = false;
        self.owner.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc, Arc},
        thread,
    };

    use super::*;

    #[test]
    fn grants_access_to_the_value() {
        let token = OwnershipToken::new(1);

        let doubled = token
            .with(Duration::from_millis(10), |value| {
                *value *= 2;
                *value
            })
            .expect("token should be free");

        assert_eq!(doubled, 2);
    }

    #[test]
    fn times_out_while_another_owner_holds_the_token() {
        let token = Arc::new(OwnershipToken::new(()));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let token = Arc::clone(&token);
            thread::spawn(move || {
                token
                    .with(Duration::from_secs(1), |_| {
                        entered_tx.send(()).expect("signal entry");
                        release_rx.recv().expect("wait for release");
                    })
                    .expect("holder acquires token");
            })
        };

        entered_rx.recv().expect("holder entered");
        let result = token.with(Duration::from_millis(20), |_| ());
        release_tx.send(()).expect("release holder");
        holder.join().expect("holder thread");

        assert_eq!(result, Err(TokenError::Timeout));
        assert!(token.with(Duration::from_millis(20), |_| ()).is_ok());
    }

    #[test]
    fn serializes_concurrent_owners() {
        let token = Arc::new(OwnershipToken::new(Vec::new()));

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let token = Arc::clone(&token);
                thread::spawn(move || {
                    for step in 0..50 {
                        token
                            .with(Duration::from_secs(5), |log| log.push((worker, step)))
                            .expect("token acquired");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }

        let len = token
            .with(Duration::from_secs(1), |log| log.len())
            .expect("token acquired");
        assert_eq!(len, 400);
    }

    #[test]
    fn panicking_owner_poisons_the_value() {
        let token = Arc::new(OwnershipToken::new(0));

        let crashed = {
            let token = Arc::clone(&token);
            thread::spawn(move || {
                let _ = token.with(Duration::from_secs(1), |_| panic!("owner crashed"));
            })
            .join()
        };

        assert!(crashed.is_err());
        assert_eq!(
            token.with(Duration::from_millis(10), |_| ()),
            Err(TokenError::Poisoned)
        );
    }
}
