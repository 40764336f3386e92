use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use thiserror::Error;

/// Errors surfaced by an [`Output`] cell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
  /// The cell was resolved or failed twice. This is a programming error in
  /// the caller; the first transition's value is unaffected.
  #[error("output already resolved")]
  AlreadyResolved,

  /// The producing side failed; waiters observe the message.
  #[error("{0}")]
  Failed(String),
}

type Continuation<T> = Box<dyn FnOnce(&Result<T, OutputError>) + Send>;

enum CellState<T> {
  Waiting {
    wakers: Vec<Waker>,
    continuations: Vec<Continuation<T>>,
  },
  Complete(Result<T, OutputError>),
}

/// A deferred value cell for a not-yet-known resource attribute.
///
/// An output transitions exactly once: `resolve` on success or `fail` on
/// error. Waiters registered before the transition are woken in FIFO order;
/// waiters arriving afterwards observe the completed value immediately.
/// Cloning is cheap and shares the cell.
pub struct Output<T> {
  cell: Arc<Mutex<CellState<T>>>,
}

impl<T> Clone for Output<T> {
  fn clone(&self) -> Self {
    Self {
      cell: Arc::clone(&self.cell),
    }
  }
}

impl<T: Clone + Send + 'static> Default for Output<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Clone + Send + 'static> Output<T> {
  pub fn new() -> Self {
    Self {
      cell: Arc::new(Mutex::new(CellState::Waiting {
        wakers: Vec::new(),
        continuations: Vec::new(),
      })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, CellState<T>> {
    // A continuation can only poison the lock by panicking outside it, so
    // the state itself is still consistent; recover and keep going.
    self.cell.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Complete the cell with a value, waking all waiters.
  ///
  /// Fails with [`OutputError::AlreadyResolved`] if the cell has already
  /// transitioned; the original value is left untouched.
  pub fn resolve(&self, value: T) -> Result<(), OutputError> {
    self.complete(Ok(value))
  }

  /// Complete the cell with an error. Mutually exclusive with `resolve`.
  pub fn fail(&self, message: impl Into<String>) -> Result<(), OutputError> {
    self.complete(Err(OutputError::Failed(message.into())))
  }

  fn complete(&self, result: Result<T, OutputError>) -> Result<(), OutputError> {
    let (wakers, continuations) = {
      let mut cell = self.lock();
      match &mut *cell {
        CellState::Complete(_) => return Err(OutputError::AlreadyResolved),
        CellState::Waiting {
          wakers,
          continuations,
        } => {
          let wakers = std::mem::take(wakers);
          let continuations = std::mem::take(continuations);
          *cell = CellState::Complete(result.clone());
          (wakers, continuations)
        }
      }
    };

    // Outside the lock: continuations first so derived cells are complete
    // by the time direct waiters run, then wakers in registration order.
    for continuation in continuations {
      continuation(&result);
    }
    for waker in wakers {
      waker.wake();
    }

    Ok(())
  }

  /// The completed result, if any, without waiting.
  pub fn peek(&self) -> Option<Result<T, OutputError>> {
    match &*self.lock() {
      CellState::Complete(result) => Some(result.clone()),
      CellState::Waiting { .. } => None,
    }
  }

  /// Wait for the cell to complete.
  pub fn wait(&self) -> Wait<T> {
    Wait {
      output: self.clone(),
    }
  }

  /// Derive a new cell that resolves with `f` applied to this cell's value.
  ///
  /// Failure propagates to the derived cell without invoking `f`.
  pub fn map<U, F>(&self, f: F) -> Output<U>
  where
    U: Clone + Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
  {
    let derived = Output::new();
    let target = derived.clone();
    self.on_complete(move |result| {
      let mapped = match result {
        Ok(value) => Ok(f(value.clone())),
        Err(err) => Err(err.clone()),
      };
      // The derived cell is fresh; this is its only transition.
      let _ = target.complete(mapped);
    });
    derived
  }

  fn on_complete<F>(&self, f: F)
  where
    F: FnOnce(&Result<T, OutputError>) + Send + 'static,
  {
    let completed = {
      let mut cell = self.lock();
      match &mut *cell {
        CellState::Complete(result) => Some(result.clone()),
        CellState::Waiting { continuations, .. } => {
          continuations.push(Box::new(f));
          return;
        }
      }
    };

    if let Some(result) = completed {
      f(&result);
    }
  }
}

/// Future returned by [`Output::wait`].
#[must_use = "futures do nothing unless awaited"]
pub struct Wait<T> {
  output: Output<T>,
}

impl<T: Clone + Send + 'static> Future for Wait<T> {
  type Output = Result<T, OutputError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut cell = self.output.lock();
    match &mut *cell {
      CellState::Complete(result) => Poll::Ready(result.clone()),
      CellState::Waiting { wakers, .. } => {
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
          wakers.push(cx.waker().clone());
        }
        Poll::Pending
      }
    }
  }
}
