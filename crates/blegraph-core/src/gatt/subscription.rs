//! 订阅列表
//!
//! 派发时先在列表锁内取快照，再在锁外逐个调用，长时间运行的处理函数不会
//! 阻塞并发的订阅/退订。每个条目带一个闸门：
//!
//! - 派发前检查条目是否已退役，并登记当前线程
//! - 退订先把条目移出列表，再退役条目并等待其他线程上正在执行的调用结束
//!
//! 因此 `remove` 返回之后该处理函数不会再被调用。处理函数在自身内部退订
//! 自己时不会等待自己。两个处理函数在不同线程上同时互相退订会互相等待，
//! 调用方需要避免这种用法。

use crate::callback::CallableIdentity;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Gate {
    retired: bool,
    running: Vec<ThreadId>,
}

struct Subscription<A: ?Sized + 'static> {
    handler: CallableIdentity<A>,
    gate: Mutex<Gate>,
    idle: Condvar,
}

/// 调用结束（包括 panic 展开）时注销运行中的线程
struct RunGuard<'a> {
    gate: &'a Mutex<Gate>,
    idle: &'a Condvar,
    thread: ThreadId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut gate = lock(self.gate);
        if let Some(pos) = gate.running.iter().position(|t| *t == self.thread) {
            gate.running.swap_remove(pos);
        }
        self.idle.notify_all();
    }
}

impl<A: ?Sized + 'static> Subscription<A> {
    fn new(handler: CallableIdentity<A>) -> Self {
        Self {
            handler,
            gate: Mutex::new(Gate::default()),
            idle: Condvar::new(),
        }
    }

    fn run(&self, args: &A) -> bool {
        let thread = thread::current().id();
        {
            let mut gate = lock(&self.gate);
            if gate.retired {
                return false;
            }
            gate.running.push(thread);
        }
        let _guard = RunGuard {
            gate: &self.gate,
            idle: &self.idle,
            thread,
        };
        self.handler.invoke(args);
        true
    }

    fn retire(&self) {
        let me = thread::current().id();
        let mut gate = lock(&self.gate);
        gate.retired = true;
        while gate.running.iter().any(|t| *t != me) {
            gate = self
                .idle
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// 线程安全的处理函数列表
pub struct SubscriberList<A: ?Sized + 'static> {
    entries: Mutex<Vec<Arc<Subscription<A>>>>,
}

impl<A: ?Sized + 'static> Default for SubscriberList<A> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<A: ?Sized + 'static> SubscriberList<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加处理函数；已存在相等的处理函数时不重复添加，返回 `false`
    pub fn add(&self, handler: CallableIdentity<A>) -> bool {
        let mut entries = lock(&self.entries);
        if entries.iter().any(|s| s.handler == handler) {
            return false;
        }
        entries.push(Arc::new(Subscription::new(handler)));
        true
    }

    /// 移除第一个与 `handler` 相等的处理函数
    pub fn remove(&self, handler: &CallableIdentity<A>) -> bool {
        let removed = {
            let mut entries = lock(&self.entries);
            entries
                .iter()
                .position(|s| s.handler == *handler)
                .map(|pos| entries.remove(pos))
        };
        match removed {
            Some(subscription) => {
                subscription.retire();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handler: &CallableIdentity<A>) -> bool {
        lock(&self.entries).iter().any(|s| s.handler == *handler)
    }

    /// 移除全部处理函数，返回移除的数量
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = lock(&self.entries).drain(..).collect();
        for subscription in &drained {
            subscription.retire();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按登记顺序调用快照中的处理函数，返回实际调用的数量
    pub fn dispatch(&self, args: &A) -> usize {
        let snapshot: Vec<_> = lock(&self.entries).iter().cloned().collect();
        snapshot.iter().filter(|s| s.run(args)).count()
    }
}
