use crate::{element::Accum, tiles::DistributedTensor};

pub trait BinaryOp<F> {
    fn apply(&self, dst: F, src: F) -> F;
}

macro_rules! impl_binary_ops {
    {
    $(
        $name:ident<$t:ident>($dst:ident, $src:ident) => $body:expr;
    )+
    } => {
    $(
        ::paste::paste! {
            #[derive(Clone, Copy, Debug)]
            pub struct [<$name Op>];

            impl<$t: Accum> BinaryOp<$t> for [<$name Op>] {
                #[inline]
                fn apply(&self, $dst: $t, $src: $t) -> $t {
                    $body
                }
            }
        }
    )+
    };
}

macro_rules! impl_binary_convenience_fns {
    {
        for $ty:ident;
        $(
            $name:ident<$t:ident>($dst:ident, $src:ident) => $body:expr;
        )+
    }
    => {
        ::paste::paste! {
            $(
                impl<$t: Accum> $ty<$t> {
                    pub fn [<$name:snake>](&mut self, other: &$ty<$t>) {
                        self.apply_binary_op([<$name Op>], other);
                    }
                }
            )+
        }
    };
}

macro_rules! with_binary_ops {
    ($callback:path ; $($($arg:tt)+)?) => {
        $callback! {
            $($($arg)+;)?

            Assign<F>(_dst, src) => src;

            Add<F>(dst, src) => dst + src;
            Sub<F>(dst, src) => dst - src;
            Mul<F>(dst, src) => dst * src;
            Div<F>(dst, src) => dst / src;

            Min<F>(dst, src) => dst.min(src);
            Max<F>(dst, src) => dst.max(src);
        }
    };
}

with_binary_ops!(impl_binary_ops;);
with_binary_ops!(impl_binary_convenience_fns; for DistributedTensor);
