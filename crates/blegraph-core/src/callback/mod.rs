//! 可比较身份的回调
//!
//! Rust 闭包无法比较相等，也无法得知它绑定的接收者，这使得"退订某个确切的
//! 处理函数"做不到。`CallableIdentity` 用一个封闭的变体集合解决这个问题：
//!
//! - **Null**: 默认的空处理函数，调用返回 `R::default()`
//! - **Plain**: 普通函数指针，按函数地址比较
//! - **Member**: `Arc<T>` 实例 + 方法，按实例地址与方法地址比较
//! - **Captured**: 捕获数据 + 函数，按函数地址比较，可选地再比较数据
//! - **Opaque**: 任意闭包 + 调用方指定的数字 id，按 id 比较
//!
//! 不同变体之间永远不相等，而且在比较载荷之前就已短路。

mod binding;

use binding::{CapturedBinding, ErasedBinding, MemberBinding};
use std::fmt;
use std::sync::Arc;

/// 变体种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableKind {
    Null,
    Plain,
    Member,
    Captured,
    Opaque,
}

enum Binding<A: ?Sized + 'static, R: 'static> {
    Null,
    Plain(fn(&A) -> R),
    Member(Box<dyn ErasedBinding<A, R>>),
    Captured(Box<dyn ErasedBinding<A, R>>),
    Opaque {
        id: u64,
        func: Arc<dyn Fn(&A) -> R + Send + Sync>,
    },
}

/// 带身份语义的回调
///
/// 克隆得到的副本与原值相等（值语义），因此订阅列表可以用一个副本去移除
/// 原先登记的处理函数。
pub struct CallableIdentity<A: ?Sized + 'static, R: 'static = ()> {
    binding: Binding<A, R>,
}

impl<A: ?Sized + 'static, R: 'static> CallableIdentity<A, R> {
    pub fn null() -> Self {
        Self {
            binding: Binding::Null,
        }
    }

    pub fn plain(func: fn(&A) -> R) -> Self {
        Self {
            binding: Binding::Plain(func),
        }
    }

    /// 绑定共享实例上的方法
    pub fn member<T>(instance: Arc<T>, member: fn(&T, &A) -> R) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            binding: Binding::Member(Box::new(MemberBinding { instance, member })),
        }
    }

    /// 捕获数据，数据不参与身份比较
    pub fn captured<D>(data: D, func: fn(&D, &A) -> R) -> Self
    where
        D: Clone + Send + Sync + 'static,
    {
        Self {
            binding: Binding::Captured(Box::new(CapturedBinding {
                data,
                func,
                data_eq: None,
            })),
        }
    }

    /// 捕获数据，数据参与身份比较
    pub fn captured_with_identity<D>(data: D, func: fn(&D, &A) -> R) -> Self
    where
        D: Clone + PartialEq + Send + Sync + 'static,
    {
        Self {
            binding: Binding::Captured(Box::new(CapturedBinding {
                data,
                func,
                data_eq: Some(<D as PartialEq>::eq),
            })),
        }
    }

    /// 包装任意闭包；相等性只取决于 `id`，id 的唯一性由调用方负责
    pub fn opaque<F>(id: u64, func: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        Self {
            binding: Binding::Opaque {
                id,
                func: Arc::new(func),
            },
        }
    }

    pub fn kind(&self) -> CallableKind {
        match &self.binding {
            Binding::Null => CallableKind::Null,
            Binding::Plain(_) => CallableKind::Plain,
            Binding::Member(_) => CallableKind::Member,
            Binding::Captured(_) => CallableKind::Captured,
            Binding::Opaque { .. } => CallableKind::Opaque,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.binding, Binding::Null)
    }

    /// 调用处理函数；`Null` 返回 `None`
    pub fn try_invoke(&self, args: &A) -> Option<R> {
        match &self.binding {
            Binding::Null => None,
            Binding::Plain(func) => Some(func(args)),
            Binding::Member(b) | Binding::Captured(b) => Some(b.invoke(args)),
            Binding::Opaque { func, .. } => Some(func(args)),
        }
    }

    /// 身份比较，等价于 `==`
    pub fn equals(&self, other: &Self) -> bool {
        match (&self.binding, &other.binding) {
            (Binding::Null, Binding::Null) => true,
            (Binding::Plain(a), Binding::Plain(b)) => std::ptr::fn_addr_eq(*a, *b),
            (Binding::Member(a), Binding::Member(b)) => a.same_identity(b.as_ref()),
            (Binding::Captured(a), Binding::Captured(b)) => a.same_identity(b.as_ref()),
            (Binding::Opaque { id: a, .. }, Binding::Opaque { id: b, .. }) => a == b,
            _ => false,
        }
    }

    /// 诊断用描述，不参与相等或调用
    pub fn describe(&self) -> String {
        match &self.binding {
            Binding::Null => "null()".to_string(),
            Binding::Plain(func) => format!("plain({:p})", *func as *const ()),
            Binding::Member(b) | Binding::Captured(b) => b.describe(),
            Binding::Opaque { id, .. } => format!("opaque(#{})", id),
        }
    }
}

impl<A: ?Sized + 'static, R: Default + 'static> CallableIdentity<A, R> {
    pub fn invoke(&self, args: &A) -> R {
        self.try_invoke(args).unwrap_or_default()
    }
}

impl<A: ?Sized + 'static, R: 'static> Clone for CallableIdentity<A, R> {
    fn clone(&self) -> Self {
        let binding = match &self.binding {
            Binding::Null => Binding::Null,
            Binding::Plain(func) => Binding::Plain(*func),
            Binding::Member(b) => Binding::Member(b.clone_box()),
            Binding::Captured(b) => Binding::Captured(b.clone_box()),
            Binding::Opaque { id, func } => Binding::Opaque {
                id: *id,
                func: Arc::clone(func),
            },
        };
        Self { binding }
    }
}

impl<A: ?Sized + 'static, R: 'static> Default for CallableIdentity<A, R> {
    fn default() -> Self {
        Self::null()
    }
}

impl<A: ?Sized + 'static, R: 'static> PartialEq for CallableIdentity<A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl<A: ?Sized + 'static, R: 'static> Eq for CallableIdentity<A, R> {}

impl<A: ?Sized + 'static, R: 'static> fmt::Debug for CallableIdentity<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CallableIdentity")
            .field(&self.describe())
            .finish()
    }
}

impl<A: ?Sized + 'static, R: 'static> fmt::Display for CallableIdentity<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
