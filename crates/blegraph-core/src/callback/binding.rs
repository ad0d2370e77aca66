//! 类型擦除后的绑定形式
//!
//! 成员绑定与捕获数据绑定带有各自的具体类型参数，放进同一个枚举之前需要
//! 先擦除成 `ErasedBinding`。身份比较通过 `Any` 向下转型完成：具体类型不同
//! 的两个绑定直接视为不相等，不会去比较载荷。

use std::any::{Any, type_name};
use std::sync::Arc;

pub(crate) trait ErasedBinding<A: ?Sized + 'static, R: 'static>: Send + Sync {
    fn invoke(&self, args: &A) -> R;

    fn clone_box(&self) -> Box<dyn ErasedBinding<A, R>>;

    fn same_identity(&self, other: &dyn ErasedBinding<A, R>) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn describe(&self) -> String;
}

/// 共享实例 + 方法
pub(crate) struct MemberBinding<T, A: ?Sized, R> {
    pub(crate) instance: Arc<T>,
    pub(crate) member: fn(&T, &A) -> R,
}

impl<T, A, R> ErasedBinding<A, R> for MemberBinding<T, A, R>
where
    T: Send + Sync + 'static,
    A: ?Sized + 'static,
    R: 'static,
{
    fn invoke(&self, args: &A) -> R {
        (self.member)(&self.instance, args)
    }

    fn clone_box(&self) -> Box<dyn ErasedBinding<A, R>> {
        Box::new(MemberBinding {
            instance: Arc::clone(&self.instance),
            member: self.member,
        })
    }

    fn same_identity(&self, other: &dyn ErasedBinding<A, R>) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| {
                Arc::ptr_eq(&self.instance, &o.instance) && std::ptr::fn_addr_eq(self.member, o.member)
            })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> String {
        format!(
            "member({}@{:p}, {:p})",
            type_name::<T>(),
            Arc::as_ptr(&self.instance),
            self.member as *const ()
        )
    }
}

/// 捕获数据 + 函数
///
/// `data_eq` 为 `Some` 时数据参与身份比较；为 `None` 时只比较函数指针，
/// 此时 `D` 不需要实现 `PartialEq`。
pub(crate) struct CapturedBinding<D, A: ?Sized, R> {
    pub(crate) data: D,
    pub(crate) func: fn(&D, &A) -> R,
    pub(crate) data_eq: Option<fn(&D, &D) -> bool>,
}

impl<D, A, R> ErasedBinding<A, R> for CapturedBinding<D, A, R>
where
    D: Clone + Send + Sync + 'static,
    A: ?Sized + 'static,
    R: 'static,
{
    fn invoke(&self, args: &A) -> R {
        (self.func)(&self.data, args)
    }

    fn clone_box(&self) -> Box<dyn ErasedBinding<A, R>> {
        Box::new(CapturedBinding {
            data: self.data.clone(),
            func: self.func,
            data_eq: self.data_eq,
        })
    }

    fn same_identity(&self, other: &dyn ErasedBinding<A, R>) -> bool {
        let Some(o) = other.as_any().downcast_ref::<Self>() else {
            return false;
        };
        if !std::ptr::fn_addr_eq(self.func, o.func) {
            return false;
        }
        // 两侧的身份标志必须一致，保证相等关系对称
        match (self.data_eq, o.data_eq) {
            (None, None) => true,
            (Some(eq), Some(_)) => eq(&self.data, &o.data),
            _ => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> String {
        format!(
            "captured({}, {:p}, identity={})",
            type_name::<D>(),
            self.func as *const (),
            self.data_eq.is_some()
        )
    }
}
